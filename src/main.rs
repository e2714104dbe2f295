use rtlamr2mqtt::{os_signals::spawn_signal_watcher, Config, MqttPublisher, Supervisor, UsbDeviceReset};
use tokio_util::sync::CancellationToken;
use std::{env, path::PathBuf};
use log::{error, info};


#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    let default_filter = std::env::var("R2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Some(device) = config.general.usb_device() {
        info!("USB device: {device:?}");
    }

    /* the signal path only flips the token, the supervisor does the cleanup */
    let cancel = CancellationToken::new();
    let _signals = spawn_signal_watcher(cancel.clone());

    let publisher = MqttPublisher::new(&config.mqtt, &config.meters, &config.general.payload);
    let mut supervisor = Supervisor::new(&config, publisher, UsbDeviceReset, cancel);

    info!("Supervising {} meters, waiting for a signal to exit", config.meters.len());
    supervisor.run().await;

    supervisor.into_publisher().shutdown().await;
    info!("Exiting");
}
