//! Integration tests for the repeater
//!
//! These tests verify end-to-end behavior including:
//! - Unicast vs. broadcast forwarding across paths
//! - Station freshness and lazy removal of dead paths
//! - Real TCP clients through the listener, with and without auth
//! - GPS beacon fan-out to GPS clients

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use rats_protocol::{ddt2, BlockScanner, Frame, BROADCAST_CALL, SESSION_CHAT};
use rats_repeater::{
    listen_on_addr, FrameHandler, Listeners, Repeater, RepeaterConfig, RepeaterError, Transport,
    TransportId,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Transport that records sent frames and lets tests inject inbound ones
    pub struct Recorder {
        id: TransportId,
        name: String,
        enabled: AtomicBool,
        sent: Mutex<Vec<Frame>>,
        handler: Mutex<Option<FrameHandler>>,
    }

    impl Recorder {
        pub fn attach(repeater: &Repeater, name: &str) -> Arc<Self> {
            let recorder = Arc::new(Self {
                id: TransportId::next(),
                name: name.to_string(),
                enabled: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
            });
            repeater.add_new_transport(recorder.clone());
            recorder
        }

        pub fn receive(&self, frame: Frame) {
            let handler = self.handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler(frame);
            }
        }

        pub fn drain(&self) -> Vec<Frame> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Transport for Recorder {
        fn id(&self) -> TransportId {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
        fn disable(&self) {
            self.enabled.store(false, Ordering::SeqCst);
        }
        fn send_frame(&self, frame: Frame) -> Result<(), RepeaterError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }
        fn set_inhandler(&self, handler: Option<FrameHandler>) {
            *self.handler.lock().unwrap() = handler;
        }
    }

    pub fn frame(src: &str, dst: &str) -> Frame {
        Frame::new(src, dst, b"test".to_vec())
    }

    /// Start a repeater listening on loopback ephemeral ports
    pub async fn start_repeater(
        config: RepeaterConfig,
    ) -> (Repeater, std::net::SocketAddr, std::net::SocketAddr) {
        let data = listen_on_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let gps = listen_on_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let data_addr = data.local_addr().unwrap();
        let gps_addr = gps.local_addr().unwrap();

        let repeater = Repeater::new("TEST", config);
        repeater
            .repeat(Listeners {
                data: Some(data),
                gps: Some(gps),
            })
            .unwrap();
        (repeater, data_addr, gps_addr)
    }

    /// Wait until `cond` holds, polling every few milliseconds
    pub async fn wait_for(mut cond: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    /// Read from `stream` until the collected text contains `needle`
    pub async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
        let mut text = String::new();
        let mut buf = [0u8; 256];
        timeout(Duration::from_secs(5), async {
            while !text.contains(needle) {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed while waiting for {needle:?}");
                text.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
        })
        .await
        .expect("reply not received");
        text
    }

    /// Read the next DDT2 frame from a client connection
    pub async fn next_frame(stream: &mut TcpStream, scanner: &mut BlockScanner) -> Frame {
        let mut buf = [0u8; 1024];
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(result) = scanner.next_frame() {
                    return result.unwrap();
                }
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed");
                scanner.push_bytes(&buf[..n]);
            }
        })
        .await
        .expect("frame not received")
    }

    pub async fn send(stream: &mut TcpStream, frame: &Frame) {
        stream
            .write_all(&ddt2::encode_block(frame).unwrap())
            .await
            .unwrap();
    }
}

// ============================================================================
// Forwarding Tests
// ============================================================================

mod forwarding_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fresh_station_gets_direct_delivery_then_broadcast_when_stale() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = Recorder::attach(&repeater, "A");
        let b = Recorder::attach(&repeater, "B");

        a.receive(frame("X", BROADCAST_CALL));
        assert_eq!(b.drain().len(), 1);

        b.receive(frame("Y", "X"));
        assert_eq!(a.drain().len(), 1);
        assert!(b.drain().is_empty());

        tokio::time::advance(Duration::from_secs(601)).await;
        b.receive(frame("Y", "X"));
        // Broadcast, but never back out the arrival path
        assert_eq!(a.drain().len(), 1);
        assert!(b.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn custom_call_timeout_is_honoured() {
        let config = RepeaterConfig {
            call_timeout_secs: 10,
            ..Default::default()
        };
        let repeater = Repeater::new("TEST", config);
        let a = Recorder::attach(&repeater, "A");
        let b = Recorder::attach(&repeater, "B");
        let c = Recorder::attach(&repeater, "C");

        a.receive(frame("X", BROADCAST_CALL));
        b.drain();
        c.drain();

        tokio::time::advance(Duration::from_secs(9)).await;
        b.receive(frame("Y", "X"));
        assert!(c.drain().is_empty());
        assert_eq!(a.drain().len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        b.receive(frame("Y", "X"));
        assert_eq!(c.drain().len(), 1);
        assert_eq!(a.drain().len(), 1);
    }

    #[test]
    fn copies_are_independent() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = Recorder::attach(&repeater, "A");
        let b = Recorder::attach(&repeater, "B");
        let c = Recorder::attach(&repeater, "C");

        a.receive(frame("X", BROADCAST_CALL));
        let to_b = b.drain().pop().unwrap();
        let to_c = c.drain().pop().unwrap();
        to_b.mark_sent();
        assert!(!to_c.is_sent());
    }

    #[test]
    fn bounded_table_keeps_routing() {
        let config = RepeaterConfig {
            max_stations: Some(1),
            ..Default::default()
        };
        let repeater = Repeater::new("TEST", config);
        let a = Recorder::attach(&repeater, "A");
        let b = Recorder::attach(&repeater, "B");

        a.receive(frame("X", BROADCAST_CALL));
        a.receive(frame("Y", BROADCAST_CALL));
        let stations = repeater.stations();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].call, "Y");

        // X was evicted, so frames for it are repeated everywhere
        b.drain();
        b.receive(frame("Z", "X"));
        assert_eq!(a.drain().len(), 1);
    }
}

// ============================================================================
// Network Tests
// ============================================================================

mod network_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test]
    async fn clients_relay_through_listener() {
        let (repeater, data_addr, _) = start_repeater(RepeaterConfig::default()).await;

        let mut one = TcpStream::connect(data_addr).await.unwrap();
        read_until(&mut one, "100 Authentication not required\r\n").await;
        let mut two = TcpStream::connect(data_addr).await.unwrap();
        read_until(&mut two, "100 Authentication not required\r\n").await;
        wait_for(|| repeater.paths().len() == 2).await;

        let mut scan_one = BlockScanner::new();
        let mut scan_two = BlockScanner::new();

        send(&mut one, &frame("X", BROADCAST_CALL)).await;
        let got = next_frame(&mut two, &mut scan_two).await;
        assert_eq!(got.s_station, "X");

        send(&mut two, &frame("Y", "X")).await;
        let got = next_frame(&mut one, &mut scan_one).await;
        assert_eq!(got.s_station, "Y");
        assert_eq!(got.d_station, "X");

        let calls: Vec<_> = repeater.stations().into_iter().map(|s| s.call).collect();
        assert!(calls.contains(&"X".to_string()));
        assert!(calls.contains(&"Y".to_string()));

        repeater.stop().await;
    }

    #[tokio::test]
    async fn authenticated_client_is_attached() {
        let mut users = tempfile::NamedTempFile::new().unwrap();
        writeln!(users, "W1AW secret").unwrap();
        let config = RepeaterConfig {
            reqauth: true,
            trustlocal: false,
            users_file: Some(users.path().to_path_buf()),
            ..Default::default()
        };
        let (repeater, data_addr, _) = start_repeater(config).await;

        let mut client = TcpStream::connect(data_addr).await.unwrap();
        read_until(&mut client, "101 Authorization required\r\n").await;
        client.write_all(b"USER w1aw\r\n").await.unwrap();
        read_until(&mut client, "102 USER okay\r\n").await;
        client.write_all(b"PASS secret\r\n").await.unwrap();
        read_until(&mut client, "200 Authorized\r\n").await;

        wait_for(|| repeater.paths().len() == 1).await;
        repeater.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_clients_still_authenticating() {
        let config = RepeaterConfig {
            reqauth: true,
            trustlocal: false,
            ..Default::default()
        };
        let (repeater, data_addr, _) = start_repeater(config).await;
        let local = Recorder::attach(&repeater, "local");

        let mut client = TcpStream::connect(data_addr).await.unwrap();
        read_until(&mut client, "101 Authorization required\r\n").await;
        wait_for(|| repeater.paths().len() == 2).await;

        // Traffic is not queued for a client that has not authenticated
        local.receive(frame("X", BROADCAST_CALL));
        assert_eq!(repeater.paths().len(), 2);

        repeater.stop().await;
        let mut buf = [0u8; 256];
        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match client.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "client still connected after stop");
    }

    #[tokio::test]
    async fn rejected_client_is_pruned_on_next_broadcast() {
        let config = RepeaterConfig {
            reqauth: true,
            trustlocal: false,
            ..Default::default()
        };
        let (repeater, data_addr, _) = start_repeater(config).await;
        let local = Recorder::attach(&repeater, "local");

        let mut client = TcpStream::connect(data_addr).await.unwrap();
        client.write_all(b"USER nobody\r\nPASS x\r\n").await.unwrap();
        read_until(&mut client, "500 Not authorized\r\n").await;
        wait_for(|| repeater.paths().len() == 2).await;

        // Give the link task a moment to mark itself disabled
        tokio::time::sleep(Duration::from_millis(50)).await;
        local.receive(frame("X", BROADCAST_CALL));
        assert_eq!(repeater.paths(), vec!["local".to_string()]);

        repeater.stop().await;
    }

    #[tokio::test]
    async fn gps_clients_receive_beacons() {
        let (repeater, _, gps_addr) = start_repeater(RepeaterConfig::default()).await;
        let radio = Recorder::attach(&repeater, "radio");

        let mut gps = TcpStream::connect(gps_addr).await.unwrap();
        wait_for(|| repeater.gps_clients() == 1).await;

        radio.receive(
            Frame::new(BROADCAST_CALL, BROADCAST_CALL, b"$GPGGA,123\r\n".to_vec())
                .with_session(SESSION_CHAT),
        );
        let text = read_until(&mut gps, "\r\n").await;
        assert_eq!(text, "$GPGGA,123\r\n");

        repeater.stop().await;
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::helpers::*;
    use super::*;

    proptest! {
        /// Unknown destinations reach every live path except the arrival path,
        /// exactly once, and dead paths are dropped.
        #[test]
        fn broadcast_reaches_each_live_path_once(
            alive in prop::collection::vec(any::<bool>(), 2..8),
            arrival_idx in any::<prop::sample::Index>(),
        ) {
            let repeater = Repeater::new("TEST", RepeaterConfig::default());
            let paths: Vec<_> = (0..alive.len())
                .map(|i| Recorder::attach(&repeater, &format!("P{i}")))
                .collect();
            let arrival = arrival_idx.index(paths.len());
            for (path, up) in paths.iter().zip(&alive) {
                if !up {
                    path.disable();
                }
            }

            paths[arrival].receive(frame("SRC", "NOBODY"));

            for (i, path) in paths.iter().enumerate() {
                let expected = usize::from(i != arrival && alive[i]);
                prop_assert_eq!(path.drain().len(), expected);
            }
            let remaining = repeater.paths();
            for (i, up) in alive.iter().enumerate() {
                let kept = i == arrival || *up;
                prop_assert_eq!(remaining.contains(&format!("P{i}")), kept);
            }
        }

        /// A fresh destination gets exactly one copy and nobody else hears it.
        #[test]
        fn fresh_destination_is_unicast(
            count in 2usize..8,
            home_idx in any::<prop::sample::Index>(),
            from_idx in any::<prop::sample::Index>(),
        ) {
            let repeater = Repeater::new("TEST", RepeaterConfig::default());
            let paths: Vec<_> = (0..count)
                .map(|i| Recorder::attach(&repeater, &format!("P{i}")))
                .collect();
            let home = home_idx.index(count);
            let from = from_idx.index(count);

            paths[home].receive(frame("DST", BROADCAST_CALL));
            for path in &paths {
                path.drain();
            }
            paths[from].receive(frame("SRC", "DST"));

            for (i, path) in paths.iter().enumerate() {
                prop_assert_eq!(path.drain().len(), usize::from(i == home));
            }
        }
    }
}
