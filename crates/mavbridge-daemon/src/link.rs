//! Link plumbing: moves bytes between the vehicle and the engine.

use anyhow::Context;
use mavbridge_core::vehicle::VehicleEngine;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Largest datagram we expect
const DATAGRAM_SIZE: usize = 2048;

/// Open a serial device, 8N1 without flow control
pub fn open_serial(path: &str, baud: u32) -> anyhow::Result<SerialStream> {
    tokio_serial::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {}", path))
}

/// Bind the UDP socket and resolve the optional fixed peer
pub async fn open_udp(
    addr: &str,
    remote: Option<&str>,
) -> anyhow::Result<(UdpSocket, Option<SocketAddr>)> {
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("Failed to bind UDP {}", addr))?;
    let remote = match remote {
        Some(remote) => Some(
            tokio::net::lookup_host(remote)
                .await
                .with_context(|| format!("Failed to resolve remote {}", remote))?
                .next()
                .with_context(|| format!("No address for remote {}", remote))?,
        ),
        None => None,
    };
    tracing::info!(local = addr, remote = ?remote, "Listening for vehicle over UDP");
    Ok((socket, remote))
}

/// Pump datagrams in both directions until the engine shuts down
pub async fn run_udp(
    engine: VehicleEngine,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    socket: UdpSocket,
    remote: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let cancel = engine.cancellation_token();
    let mut peer = remote;
    let mut buf = vec![0u8; DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received.context("UDP receive failed")?;
                if remote.is_none() && peer != Some(from) {
                    tracing::info!(%from, "Vehicle peer changed");
                    peer = Some(from);
                }
                engine.process_datagram(&buf[..len]);
            }
            Some(bytes) = outbound.recv() => match peer {
                Some(addr) => {
                    if let Err(e) = socket.send_to(&bytes, addr).await {
                        tracing::warn!(%addr, "UDP send failed: {}", e);
                    }
                }
                None => tracing::debug!("No vehicle peer yet, dropping outbound frame"),
            },
        }
    }
    Ok(())
}

/// Pump a serial stream in both directions until the engine shuts down
pub async fn run_serial(
    engine: VehicleEngine,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    stream: SerialStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader_task = engine.spawn_reader(reader);
    let cancel = engine.cancellation_token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = &mut reader_task => {
                read??;
                anyhow::bail!("Serial link closed");
            }
            Some(bytes) = outbound.recv() => {
                writer.write_all(&bytes).await.context("Serial write failed")?;
            }
        }
    }
    Ok(())
}
