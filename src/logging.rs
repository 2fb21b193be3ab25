use std::{io, sync::Once};

use tracing_subscriber::EnvFilter;

static INIT_LOGGER: Once = Once::new();

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "vault_owner_transfer=info",
        1 => "vault_owner_transfer=debug",
        _ => "vault_owner_transfer=trace",
    }
}

/// Initializes tracing once; `RUST_LOG` wins over the verbosity flag.
pub fn init_tracing(verbosity: u8) {
    INIT_LOGGER.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
        if let Err(err) = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .try_init()
        {
            eprintln!("vault-owner-transfer: tracing initialization failed: {err}");
        }
    });
}
