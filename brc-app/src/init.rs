//! `brclient init`: write a commented config template without clobbering an
//! existing one.

use anyhow::Context;
use std::path::{Path, PathBuf};

const CONFIG_TEMPLATE: &str = include_str!("../config-templates/config.toml");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Created(PathBuf),
    AlreadyPresent(PathBuf),
}

pub async fn initialize(path: Option<PathBuf>) -> anyhow::Result<InitOutcome> {
    let path = path.unwrap_or_else(crate::config::default_config_path);
    write_template(&path).await
}

async fn write_template(path: &Path) -> anyhow::Result<InitOutcome> {
    match tokio::fs::metadata(path).await {
        Ok(_) => return Ok(InitOutcome::AlreadyPresent(path.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(anyhow::anyhow!("inspect config path {}: {err}", path.display()));
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    tokio::fs::write(path, CONFIG_TEMPLATE)
        .await
        .with_context(|| format!("write config template {}", path.display()))?;
    Ok(InitOutcome::Created(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrClientConfig;
    use uuid::Uuid;

    fn temp_config(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("brclient-init-{name}-{}", Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn template_parses_and_validates() {
        let cfg = BrClientConfig::parse(CONFIG_TEMPLATE).expect("template parses");
        cfg.validate().expect("template is valid");
    }

    #[tokio::test]
    async fn init_is_idempotent_and_never_overwrites() {
        let path = temp_config("idempotent");
        let first = initialize(Some(path.clone())).await.expect("first init");
        assert_eq!(first, InitOutcome::Created(path.clone()));

        tokio::fs::write(&path, "# edited\n").await.expect("edit");
        let second = initialize(Some(path.clone())).await.expect("second init");
        assert_eq!(second, InitOutcome::AlreadyPresent(path.clone()));
        let contents = tokio::fs::read_to_string(&path).await.expect("read back");
        assert_eq!(contents, "# edited\n");

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
