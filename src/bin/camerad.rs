//! camerad - continuous camera acquisition daemon
//!
//! This daemon:
//! 1. Resolves startup configuration (defaults, CLI flags, parameter source)
//! 2. Opens the camera device once; open failure is terminal
//! 3. Runs the acquisition loop: capture, convert, stamp, publish
//! 4. Publishes one message per successful cycle on the frame topic
//! 5. Stops cooperatively on Ctrl-C, observed at the top of the next cycle
//!
//! Any setup failure (device open, publisher creation) logs an error and
//! exits with status 0 before the loop starts; there is no retry.

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camera_node::{
    AcquisitionPipeline, CaptureConfig, CaptureSource, CliOverrides, MqttPublisher,
    MqttPublisherConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera resource (e.g. csi://0, /dev/video0, stub://bench).
    #[arg(long)]
    device: Option<String>,
    /// Requested capture width.
    #[arg(long)]
    width: Option<u32>,
    /// Requested capture height.
    #[arg(long)]
    height: Option<u32>,
    /// Requested frame rate.
    #[arg(long, alias = "fps")]
    framerate: Option<f64>,
    /// MQTT broker address as host:port.
    #[arg(long, default_value = "127.0.0.1:1883", env = "CAMERAD_MQTT_BROKER")]
    mqtt_broker: String,
    /// Topic the frame messages are published on.
    #[arg(long, default_value = "camera/frames", env = "CAMERAD_MQTT_TOPIC")]
    mqtt_topic: String,
    /// MQTT client identifier.
    #[arg(long, default_value = "camerad")]
    mqtt_client_id: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cli = CliOverrides {
        device: args.device,
        width: args.width,
        height: args.height,
        framerate: args.framerate,
    };

    let config = match CaptureConfig::load(cli) {
        Ok(config) => config,
        Err(err) => {
            log::error!("invalid configuration: {err:#}");
            return Ok(());
        }
    };

    log::info!(
        "opening camera device {} @ {}x{} {}fps",
        config.resource,
        config.width,
        config.height,
        config.framerate
    );

    let source = match CaptureSource::open(&config) {
        Ok(source) => source,
        Err(err) => {
            log::error!("failed to open camera device {}: {}", config.resource, err);
            return Ok(());
        }
    };

    let publisher_config = MqttPublisherConfig {
        broker: args.mqtt_broker,
        topic: args.mqtt_topic,
        client_id: args.mqtt_client_id,
    };
    let publisher = match MqttPublisher::connect(publisher_config) {
        Ok(publisher) => publisher,
        Err(err) => {
            log::error!("failed to create frame publisher: {err:#}");
            return Ok(());
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        }) {
            log::error!("failed to install shutdown handler: {}", err);
            return Ok(());
        }
    }

    let mut pipeline = AcquisitionPipeline::new(source, publisher, shutdown);
    log::info!("camerad running, publishing video frames");
    pipeline.run();

    let stats = pipeline.stats();
    log::info!(
        "camerad stopped: published={} capture_failures={} convert_failures={} \
         publish_failures={}",
        stats.published,
        stats.capture_failures,
        stats.convert_failures,
        stats.publish_failures,
    );

    if let Err(err) = pipeline.into_publisher().disconnect() {
        log::warn!("frame publisher disconnect failed: {err:#}");
    }
    Ok(())
}
