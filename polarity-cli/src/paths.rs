use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// On-disk layout under the configuration home:
/// `config.toml`, `download.log`, `Accounts/`, `Binaries/`, `Logs/`,
/// `Temp/`.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub download_log: PathBuf,
    pub accounts: PathBuf,
    pub binaries: PathBuf,
    pub logs: PathBuf,
    pub temp: PathBuf,
}

impl AppPaths {
    pub fn resolve(
        config_file_override: Option<&Path>,
        temp_override: Option<&Path>,
    ) -> Self {
        let home = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("polarity");
        Self {
            config_file: config_file_override
                .map(Path::to_path_buf)
                .unwrap_or_else(|| home.join("config.toml")),
            download_log: home.join("download.log"),
            accounts: home.join("Accounts"),
            binaries: home.join("Binaries"),
            logs: home.join("Logs"),
            temp: temp_override
                .map(Path::to_path_buf)
                .unwrap_or_else(|| home.join("Temp")),
            home,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), ConfigError> {
        for dir in [&self.home, &self.accounts, &self.binaries, &self.logs, &self.temp] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Prepend the binaries directory to `PATH` so bundled external tools
    /// win over system ones.
    pub fn prepend_binaries_to_path(&self) {
        let current = std::env::var_os("PATH").unwrap_or_default();
        let mut entries = vec![self.binaries.clone()];
        entries.extend(std::env::split_paths(&current));
        if let Ok(joined) = std::env::join_paths(entries) {
            // Affects this process and every child it spawns.
            unsafe { std::env::set_var("PATH", joined) };
        }
    }
}
