use tracing::warn;

use nirbhay_config::ConfigLoader;

pub(super) async fn cmd_serve(config_loader: ConfigLoader, listen: Option<String>) -> nirbhay_core::Result<()> {
    let shared = config_loader.shared();
    if let Some(listen) = listen {
        shared.write().server.listen = listen;
    }

    let config = config_loader.get();
    println!("Nirbhay backend v{}", env!("CARGO_PKG_VERSION"));
    println!("   Listen: http://{}", shared.read().server.listen);
    println!(
        "   Server panic thresholds: accel > {}, gyro > {}",
        config.motion.server_accel_threshold, config.motion.server_gyro_threshold
    );
    if config.services.fast2sms_api_key.is_none() {
        println!("   SMS: demo mode (no FAST2SMS_API_KEY)");
    }

    // Kept alive for the lifetime of the server.
    let _watcher = match config_loader.watch() {
        Ok(w) => {
            println!("   Config hot-reload: enabled");
            Some(w)
        }
        Err(e) => {
            warn!(error = %e, "config hot-reload disabled");
            None
        }
    };
    println!();

    nirbhay_server::start_server(shared).await
}
