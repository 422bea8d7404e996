//! MQTT command channel on `rumqttc`.
//!
//! Uses the blocking client: publishes are queued on a bounded request
//! channel and a background thread drives the connection, reconnecting on
//! failure. QoS 0, no retain.
//!
//! The driver counts every PUBLISH it writes to the socket, so
//! [`CommandChannel::flush`] can wait until everything queued has actually
//! left the process.

use super::CommandChannel;
use crate::storage::sqlite::acquire_lock;
use crate::{Error, Result};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Default broker port.
const DEFAULT_PORT: u16 = 1883;

/// Request queue capacity.
const REQUEST_CAPACITY: usize = 64;

/// Back-off between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Clone, Copy)]
struct DeliveryCounts {
    queued: u64,
    written: u64,
}

/// Publish progress shared with the driver thread.
#[derive(Debug, Default)]
struct Delivery {
    counts: Mutex<DeliveryCounts>,
    progress: Condvar,
}

impl Delivery {
    fn queued(&self) {
        acquire_lock(&self.counts).queued += 1;
    }

    fn written(&self) {
        acquire_lock(&self.counts).written += 1;
        self.progress.notify_all();
    }
}

/// Command channel publishing to an MQTT broker.
pub struct MqttCommandChannel {
    client: Client,
    broker: String,
    delivery: Arc<Delivery>,
}

impl MqttCommandChannel {
    /// Connects to `broker_url` (`mqtt://[user:pass@]host[:port]`).
    ///
    /// Explicit credentials override those in the URL. The connection is
    /// established in the background; this call does not block on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the driver thread cannot be
    /// spawned.
    pub fn connect(
        broker_url: &str,
        username: Option<&str>,
        password: Option<&SecretString>,
    ) -> Result<Self> {
        let url = url::Url::parse(broker_url).map_err(|e| Error::operation("parse_mqtt_url", e))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::operation("parse_mqtt_url", format!("no host in '{broker_url}'")))?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let client_id = format!("fingerlink-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(Duration::from_secs(20));

        if let Some(url_password) = url.password() {
            options.set_credentials(url.username(), url_password);
        }
        if let Some(username) = username {
            let password = password.map(|p| p.expose_secret().to_string()).unwrap_or_default();
            options.set_credentials(username, password);
        }

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let broker = format!("{host}:{port}");
        let thread_broker = broker.clone();
        let delivery = Arc::new(Delivery::default());
        let thread_delivery = Arc::clone(&delivery);

        thread::Builder::new()
            .name("fingerlink-mqtt".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!(broker = %thread_broker, "mqtt connected");
                        },
                        Ok(Event::Outgoing(Outgoing::Publish(_))) => thread_delivery.written(),
                        Ok(_) => {},
                        Err(ConnectionError::RequestsDone) => break,
                        Err(e) => {
                            tracing::warn!(broker = %thread_broker, error = %e, "mqtt connection error");
                            thread::sleep(RECONNECT_DELAY);
                        },
                    }
                }
                tracing::debug!(broker = %thread_broker, "mqtt driver stopped");
            })
            .map_err(|e| Error::operation("spawn_mqtt_driver", e))?;

        Ok(Self {
            client,
            broker,
            delivery,
        })
    }

    /// Returns `host:port` of the broker.
    #[must_use]
    pub fn broker(&self) -> &str {
        &self.broker
    }
}

impl CommandChannel for MqttCommandChannel {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| Error::operation("publish_device_command", e))?;
        self.delivery.queued();
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut counts = acquire_lock(&self.delivery.counts);
        while counts.written < counts.queued {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    broker = %self.broker,
                    pending = counts.queued - counts.written,
                    "mqtt flush timed out"
                );
                return Err(Error::operation(
                    "flush_device_commands",
                    format!(
                        "{} command(s) not written to {} within {timeout:?}",
                        counts.queued - counts.written,
                        self.broker
                    ),
                ));
            }
            counts = match self.delivery.progress.wait_timeout(counts, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }
}

impl Drop for MqttCommandChannel {
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    /// Accepts one client, answers CONNECT with a delayed CONNACK and
    /// collects bytes until `until` shows up or the client goes away.
    fn fake_broker(until: &'static [u8]) -> (u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];

            let n = stream.read(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
            thread::sleep(Duration::from_millis(50));
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

            while !contains(&received, until) {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            received
        });
        (port, handle)
    }

    #[test]
    fn test_rejects_url_without_host() {
        assert!(MqttCommandChannel::connect("not a url", None, None).is_err());
        assert!(MqttCommandChannel::connect("mqtt:///path", None, None).is_err());
    }

    #[test]
    fn test_connect_is_lazy() {
        let channel = MqttCommandChannel::connect("mqtt://127.0.0.1:1", None, None).unwrap();
        assert_eq!(channel.broker(), "127.0.0.1:1");
    }

    #[test]
    fn test_flush_with_nothing_queued_returns_immediately() {
        let channel = MqttCommandChannel::connect("mqtt://127.0.0.1:1", None, None).unwrap();
        channel.flush(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_flush_waits_for_publish_to_reach_broker() {
        let (port, broker) = fake_broker(b"fingerprint/gate");
        let channel =
            MqttCommandChannel::connect(&format!("mqtt://127.0.0.1:{port}"), None, None).unwrap();

        channel
            .publish("fingerprint/gate", br#"{"id_user":17,"mode":"enroll"}"#)
            .unwrap();
        channel.flush(Duration::from_secs(5)).unwrap();

        let received = broker.join().unwrap();
        assert!(contains(&received, b"fingerprint/gate"));
        assert!(contains(&received, br#"{"id_user":17,"mode":"enroll"}"#));
    }

    #[test]
    fn test_flush_times_out_without_broker() {
        let channel = MqttCommandChannel::connect("mqtt://127.0.0.1:1", None, None).unwrap();
        channel.publish("fingerprint/gate", b"{}").unwrap();

        let err = channel.flush(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
        assert!(err.to_string().contains("not written"));
    }
}
