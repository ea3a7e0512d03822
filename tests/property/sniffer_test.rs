// tests/property/sniffer_test.rs

//! The sniffer never consumes bytes: whatever it classifies, the pipeline reads the
//! stream from its first byte.

use gatecore::connection::{Protocol, ProtocolSniffer};
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_sniffed_bytes_are_replayed(data in prop::collection::vec(any::<u8>(), 5..200)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (protocol, replayed) = rt.block_on(async {
            let (mut client, server) = tokio::io::duplex(1024);
            client.write_all(&data).await.unwrap();
            drop(client);

            let (protocol, mut sniffed) = ProtocolSniffer::sniff(server).await.unwrap();
            let mut replayed = Vec::new();
            sniffed.read_to_end(&mut replayed).await.unwrap();
            (protocol, replayed)
        });
        prop_assert_eq!(replayed, data.clone());
        let expected = if data.starts_with(b"GET /") {
            Protocol::WebSocket
        } else {
            Protocol::TcpRaw
        };
        prop_assert_eq!(protocol, expected);
    }
}
