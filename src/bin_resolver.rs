use std::path::{Path, PathBuf};

pub struct ResolveCtx {
    pub config_dir: PathBuf,
    pub explicit_path: Option<PathBuf>,
}

/// Locates the admin tool executable: configured path, environment override,
/// then `PATH`.
pub fn resolve_binary(name: &str, ctx: &ResolveCtx) -> anyhow::Result<PathBuf> {
    if let Some(explicit) = ctx.explicit_path.as_ref() {
        let resolved = resolve_relative(&ctx.config_dir, explicit);
        if resolved.is_file() {
            return Ok(resolved);
        }
        return Err(anyhow::anyhow!(
            "configured admin tool not found: {}",
            resolved.display()
        ));
    }

    let env_key = env_key(name);
    if let Some(env_path) = std::env::var_os(&env_key).map(PathBuf::from) {
        if env_path.is_file() {
            return Ok(env_path);
        }
        return Err(anyhow::anyhow!(
            "admin tool override {env_key} points at a missing file: {}",
            env_path.display()
        ));
    }

    if let Some(path) = find_on_path(name) {
        return Ok(path);
    }

    Err(anyhow::anyhow!(
        "admin tool not found: {name}\nSuggestions:\n  - set tool.path in {}\n  - set {env_key}\n  - add {name} to PATH",
        ctx.config_dir.join("settings.yaml").display()
    ))
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn binary_name(name: &str) -> String {
    if cfg!(windows) && !name.ends_with(".exe") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary_name(binary)))
        .find(|candidate| candidate.is_file())
}

pub fn env_key(name: &str) -> String {
    let normalized = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("VAULT_OWNER_TRANSFER_BINARY_{normalized}")
}
