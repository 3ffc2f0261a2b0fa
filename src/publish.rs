//! Downstream transport.
//!
//! The acquisition loop sees exactly one logical call: `publish(frame,
//! envelope)`. Encoding variants and delivery are this layer's business.
//!
//! Transports:
//! - `MqttPublisher`: one MQTT message per frame on a named topic, driven by
//!   a background connection thread.
//! - `MemoryPublisher`: in-process sink capturing published frames; used by
//!   tests and for exercising the pipeline without a broker.
//!
//! No flow control based on subscriber count: frames are published whether or
//! not anyone is listening.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::time::Duration;

use crate::convert::ConvertedFrameView;
use crate::envelope::FrameEnvelope;

/// Single logical publish call the acquisition loop hands frames to.
pub trait FramePublisher {
    fn publish(&mut self, frame: &ConvertedFrameView<'_>, envelope: &FrameEnvelope) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Wire format
// ----------------------------------------------------------------------------

const FRAME_MAGIC: &[u8; 4] = b"CAMF";
const FRAME_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8 + 8 + 4 + 4 + 2;

/// Encode one frame message: fixed little-endian header, source id, pixels.
///
/// Layout: magic "CAMF", version, seq u64, stamp_micros u64, width u32,
/// height u32, source id length u16, source id bytes, RGBA8 pixel bytes.
pub fn encode_frame_message(frame: &ConvertedFrameView<'_>, envelope: &FrameEnvelope) -> Vec<u8> {
    let id = envelope.source_id.as_bytes();
    let id_len = id.len().min(u16::MAX as usize);

    let mut payload = Vec::with_capacity(HEADER_LEN + id_len + frame.data().len());
    payload.extend_from_slice(FRAME_MAGIC);
    payload.push(FRAME_VERSION);
    payload.extend_from_slice(&envelope.seq.to_le_bytes());
    payload.extend_from_slice(&envelope.stamp_micros.to_le_bytes());
    payload.extend_from_slice(&frame.width().to_le_bytes());
    payload.extend_from_slice(&frame.height().to_le_bytes());
    payload.extend_from_slice(&(id_len as u16).to_le_bytes());
    payload.extend_from_slice(&id[..id_len]);
    payload.extend_from_slice(frame.data());
    payload
}

/// Decoded counterpart of `encode_frame_message`, for subscribers and tests.
#[derive(Clone, Debug)]
pub struct FrameMessage {
    pub envelope: FrameEnvelope,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn decode_frame_message(payload: &[u8]) -> Result<FrameMessage> {
    if payload.len() < HEADER_LEN {
        return Err(anyhow!("frame message too short: {} bytes", payload.len()));
    }
    if &payload[..4] != FRAME_MAGIC {
        return Err(anyhow!("frame message has bad magic"));
    }
    if payload[4] != FRAME_VERSION {
        return Err(anyhow!("unsupported frame message version {}", payload[4]));
    }

    let seq = u64::from_le_bytes(payload[5..13].try_into()?);
    let stamp_micros = u64::from_le_bytes(payload[13..21].try_into()?);
    let width = u32::from_le_bytes(payload[21..25].try_into()?);
    let height = u32::from_le_bytes(payload[25..29].try_into()?);
    let id_len = u16::from_le_bytes(payload[29..31].try_into()?) as usize;

    let id_end = HEADER_LEN
        .checked_add(id_len)
        .ok_or_else(|| anyhow!("frame message source id length overflow"))?;
    if payload.len() < id_end {
        return Err(anyhow!("frame message truncated inside source id"));
    }
    let source_id = std::str::from_utf8(&payload[HEADER_LEN..id_end])
        .context("frame message source id is not UTF-8")?
        .to_string();

    Ok(FrameMessage {
        envelope: FrameEnvelope {
            seq,
            stamp_micros,
            source_id,
        },
        width,
        height,
        pixels: payload[id_end..].to_vec(),
    })
}

// ----------------------------------------------------------------------------
// MQTT transport
// ----------------------------------------------------------------------------

/// Settings for the MQTT frame publisher.
#[derive(Clone, Debug)]
pub struct MqttPublisherConfig {
    /// Broker address as `host:port`.
    pub broker: String,
    /// Topic the frame messages are published on.
    pub topic: String,
    pub client_id: String,
}

impl Default for MqttPublisherConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1:1883".to_string(),
            topic: "camera/frames".to_string(),
            client_id: "camerad".to_string(),
        }
    }
}

/// MQTT frame publisher.
///
/// The connection event loop runs on a background thread; `publish` only
/// enqueues. Frames are QoS 0: a dropped frame is cheaper than a stalled
/// camera loop.
pub struct MqttPublisher {
    client: Client,
    topic: String,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttPublisher {
    pub fn connect(config: MqttPublisherConfig) -> Result<Self> {
        let (host, port) = parse_broker_addr(&config.broker)?;

        let mut options = MqttOptions::new(config.client_id.as_str(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, 10);
        let connection_handle = Some(spawn_connection_driver(connection));
        log::info!(
            "FramePublisher: connected to mqtt://{} topic {}",
            config.broker,
            config.topic
        );

        Ok(Self {
            client,
            topic: config.topic,
            connection_handle,
        })
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl FramePublisher for MqttPublisher {
    fn publish(&mut self, frame: &ConvertedFrameView<'_>, envelope: &FrameEnvelope) -> Result<()> {
        let payload = encode_frame_message(frame, envelope);
        self.client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)
            .with_context(|| format!("publish frame to {}", self.topic))?;
        Ok(())
    }
}

fn spawn_connection_driver(mut connection: Connection) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("broker address must be host:port, got {addr:?}"))?;
    if host.is_empty() {
        return Err(anyhow!("broker address has empty host: {addr:?}"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("invalid broker port in {addr:?}"))?;
    Ok((host.to_string(), port))
}

// ----------------------------------------------------------------------------
// In-memory transport (tests, broker-less runs)
// ----------------------------------------------------------------------------

/// One frame as captured by `MemoryPublisher`.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub envelope: FrameEnvelope,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// In-process sink that records every published frame.
#[derive(Default)]
pub struct MemoryPublisher {
    pub frames: Vec<PublishedFrame>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FramePublisher for MemoryPublisher {
    fn publish(&mut self, frame: &ConvertedFrameView<'_>, envelope: &FrameEnvelope) -> Result<()> {
        self.frames.push(PublishedFrame {
            envelope: envelope.clone(),
            width: frame.width(),
            height: frame.height(),
            pixels: frame.data().to_vec(),
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
