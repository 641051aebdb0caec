//! End-to-end tests for the TUN engine
//!
//! A Unix datagram socketpair stands in for the utun descriptor: the
//! engine owns one end and the test drives the other. Datagram sockets
//! keep packet boundaries the way the utun control socket does, so frames
//! cross the pair one per read. No privileges or real device required.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixDatagram;
use std::sync::{mpsc, Mutex};
use std::time::{Duration, Instant};

use hyperspace_packet::{checksum, dns, icmp, ipv4, udp, Ipv4Packet, UdpDatagram};
use hyperspace_tun::{TunInterface, TUN_HEADER_IPV4, TUN_HEADER_LEN};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// The engine and the test-side end of a fake utun device.
fn tun_pair() -> (TunInterface, UnixDatagram) {
    let (engine_end, test_end) = UnixDatagram::pair().expect("socketpair");
    test_end
        .set_read_timeout(Some(RECV_TIMEOUT))
        .expect("read timeout");
    let tun = TunInterface::new(engine_end.into_raw_fd());
    (tun, test_end)
}

/// Collect outbound callback deliveries on a channel.
fn capture_outgoing(tun: &TunInterface) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    tun.set_outgoing_callback(move |packet| {
        let _ = tx.lock().unwrap().send(packet.to_vec());
    });
    rx
}

fn framed(packet: &[u8]) -> Vec<u8> {
    let mut frame = TUN_HEADER_IPV4.to_vec();
    frame.extend_from_slice(packet);
    frame
}

fn recv_frame(device: &UnixDatagram) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let len = device.recv(&mut buf).expect("device frame");
    buf.truncate(len);
    buf
}

fn ipv4_packet(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let total_len = (ipv4::MIN_HEADER_LEN + payload.len()) as u16;
    let mut packet = vec![0u8; ipv4::MIN_HEADER_LEN];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&total_len.to_be_bytes());
    packet[8] = 64;
    packet[9] = protocol;
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    packet.extend_from_slice(payload);
    ipv4::finalize_checksum(&mut packet);
    packet
}

fn udp_packet(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = (udp::HEADER_LEN + payload.len()) as u16;
    let mut datagram = Vec::with_capacity(usize::from(udp_len));
    datagram.extend_from_slice(&src_port.to_be_bytes());
    datagram.extend_from_slice(&dst_port.to_be_bytes());
    datagram.extend_from_slice(&udp_len.to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    ipv4_packet(ipv4::proto::UDP, src, dst, &datagram)
}

fn dns_query(labels: &[&str], qtype: u16) -> Vec<u8> {
    let mut query = vec![
        0x12, 0x34, // id
        0x01, 0x00, // RD
        0x00, 0x01, // QDCOUNT
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    for label in labels {
        query.push(label.len() as u8);
        query.extend_from_slice(label.as_bytes());
    }
    query.push(0);
    query.extend_from_slice(&qtype.to_be_bytes());
    query.extend_from_slice(&dns::CLASS_IN.to_be_bytes());
    query
}

fn echo_request(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut message = vec![icmp::ECHO_REQUEST, 0, 0, 0, 0x11, 0x22, 0x00, 0x01];
    message.extend_from_slice(b"hyperspace ping");
    let sum = checksum(&message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
    ipv4_packet(ipv4::proto::ICMP, src, dst, &message)
}

#[test]
fn outbound_pass_through() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.start().unwrap();

    // A TCP packet from the host is opaque to the engine.
    let packet = ipv4_packet(
        ipv4::proto::TCP,
        Ipv4Addr::new(192, 168, 1, 2),
        Ipv4Addr::new(93, 184, 216, 34),
        &[0u8; 20],
    );
    device.send(&framed(&packet)).unwrap();

    // The callback sees exactly the unframed bytes.
    let delivered = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(delivered, packet);

    // Nothing was queued back toward the device.
    assert!(device.recv(&mut [0u8; 16]).is_err());
}

#[test]
fn read_symmetry_strips_exactly_four_bytes() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.start().unwrap();

    let packet = udp_packet(
        Ipv4Addr::new(10, 1, 1, 1),
        Ipv4Addr::new(10, 1, 1, 2),
        5000,
        6000,
        b"sym",
    );
    device.send(&framed(&packet)).unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), packet);
}

#[test]
fn short_frames_are_dropped() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.start().unwrap();

    device.send(&[0x00, 0x00, 0x02]).unwrap();

    // The next valid packet is the first delivery.
    let packet = ipv4_packet(
        ipv4::proto::TCP,
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        &[0u8; 20],
    );
    device.send(&framed(&packet)).unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), packet);
}

#[test]
fn dns_a_query_is_answered() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.set_dns_map(HashMap::from([(
        "10.0.0.7".to_string(),
        vec!["example.local".to_string()],
    )]));
    tun.start().unwrap();

    let query = udp_packet(
        Ipv4Addr::new(192, 168, 1, 10),
        Ipv4Addr::new(10, 0, 0, 53),
        54321,
        udp::DNS_PORT,
        &dns_query(&["example", "local"], dns::qtype::A),
    );
    device.send(&framed(&query)).unwrap();

    let frame = recv_frame(&device);
    assert_eq!(&frame[..TUN_HEADER_LEN], &TUN_HEADER_IPV4);

    let response = &frame[TUN_HEADER_LEN..];
    let ip = Ipv4Packet::new(response).unwrap();
    assert_eq!(ip.source(), Ipv4Addr::new(10, 0, 0, 53));
    assert_eq!(ip.destination(), Ipv4Addr::new(192, 168, 1, 10));
    assert_eq!(usize::from(ip.total_len()), response.len());
    assert_eq!(checksum(&response[..ip.header_len()]), 0);

    let datagram = UdpDatagram::new(ip.payload()).unwrap();
    assert_eq!(datagram.source_port(), udp::DNS_PORT);
    assert_eq!(datagram.dest_port(), 54321);
    assert_eq!(usize::from(datagram.length()), ip.payload().len());

    let payload = datagram.payload();
    assert_eq!(&payload[2..4], &[0x81, 0x80]);
    assert_eq!(&payload[6..8], &[0x00, 0x01]);
    assert!(payload.ends_with(&[0x0A, 0x00, 0x00, 0x07]));

    // The query itself never reaches the overlay.
    assert!(rx.try_recv().is_err());
}

#[test]
fn dns_aaaa_query_gets_empty_response() {
    let (tun, device) = tun_pair();
    tun.add_dns_entry("10.0.0.7", "example.local");
    tun.start().unwrap();

    let dns_payload = dns_query(&["example", "local"], dns::qtype::AAAA);
    let question_len = dns_payload.len();
    let query = udp_packet(
        Ipv4Addr::new(192, 168, 1, 10),
        Ipv4Addr::new(10, 0, 0, 53),
        54321,
        udp::DNS_PORT,
        &dns_payload,
    );
    device.send(&framed(&query)).unwrap();

    let frame = recv_frame(&device);
    let response = &frame[TUN_HEADER_LEN..];
    let ip = Ipv4Packet::new(response).unwrap();
    let payload = UdpDatagram::new(ip.payload()).unwrap().payload();

    assert_eq!(&payload[2..4], &[0x81, 0x80]);
    assert_eq!(&payload[6..8], &[0x00, 0x00]);
    // Header plus question only, nothing appended.
    assert_eq!(payload.len(), question_len);
}

#[test]
fn malformed_dns_passes_through() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.add_dns_entry("10.0.0.7", "example.local");
    tun.start().unwrap();

    // Eight bytes of payload cannot hold a DNS header.
    let packet = udp_packet(
        Ipv4Addr::new(192, 168, 1, 10),
        Ipv4Addr::new(10, 0, 0, 53),
        54321,
        udp::DNS_PORT,
        &[0u8; 8],
    );
    device.send(&framed(&packet)).unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), packet);
}

#[test]
fn echo_request_from_known_source_is_answered_outbound() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.add_known_ip("192.168.5.5");
    tun.start().unwrap();

    let request = echo_request(Ipv4Addr::new(192, 168, 5, 5), Ipv4Addr::new(10, 1, 2, 3));
    tun.write_packet(&request);

    // The reply goes to the overlay, not the device.
    let reply = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let ip = Ipv4Packet::new(&reply).unwrap();
    let header_len = ip.header_len();

    assert_eq!(reply[header_len], icmp::ECHO_REPLY);
    assert_eq!(ip.source(), Ipv4Addr::new(10, 1, 2, 3));
    assert_eq!(ip.destination(), Ipv4Addr::new(192, 168, 5, 5));
    assert_eq!(checksum(&reply[..header_len]), 0);
    assert_eq!(checksum(&reply[header_len..]), 0);

    assert!(device.recv(&mut [0u8; 16]).is_err());
}

#[test]
fn echo_request_from_unknown_source_reaches_device() {
    let (tun, device) = tun_pair();
    tun.add_known_ip("192.168.5.5");
    tun.start().unwrap();

    let request = echo_request(Ipv4Addr::new(172, 16, 0, 9), Ipv4Addr::new(10, 1, 2, 3));
    tun.write_packet(&request);

    assert_eq!(recv_frame(&device), framed(&request));
}

#[test]
fn write_packets_drain_in_order() {
    let (tun, device) = tun_pair();
    tun.start().unwrap();

    let first = udp_packet(
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        1111,
        2222,
        b"first",
    );
    let second = udp_packet(
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        1111,
        2222,
        b"second",
    );

    tun.write_packet(&first);
    tun.write_packet(&second);

    assert_eq!(recv_frame(&device), framed(&first));
    assert_eq!(recv_frame(&device), framed(&second));
}

#[test]
fn write_order_survives_device_backpressure() {
    let (tun, device) = tun_pair();
    tun.start().unwrap();

    // Enough traffic to overrun the socketpair buffers while the test is
    // not reading, so the write side sees EAGAIN and retries from the
    // queue head.
    let count: u16 = 800;
    let mut filler = vec![0xA5u8; 960];
    for i in 0..count {
        filler[..2].copy_from_slice(&i.to_be_bytes());
        let packet = udp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            1111,
            2222,
            &filler,
        );
        tun.write_packet(&packet);
    }

    for expected in 0..count {
        let frame = recv_frame(&device);
        let ip = Ipv4Packet::new(&frame[TUN_HEADER_LEN..]).unwrap();
        let payload = UdpDatagram::new(ip.payload()).unwrap().payload();
        let seq = u16::from_be_bytes([payload[0], payload[1]]);
        assert_eq!(seq, expected);
    }
}

#[test]
fn icmp_to_unknown_destination_is_dropped_on_read() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.start().unwrap();

    let request = echo_request(Ipv4Addr::new(192, 168, 0, 2), Ipv4Addr::new(10, 9, 9, 9));
    device.send(&framed(&request)).unwrap();

    // Followed by a packet that must be the first delivery.
    let marker = ipv4_packet(
        ipv4::proto::TCP,
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        &[0u8; 20],
    );
    device.send(&framed(&marker)).unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), marker);
}

#[test]
fn icmp_to_known_destination_is_forwarded_on_read() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.add_known_ip("10.9.9.9");
    tun.start().unwrap();

    let request = echo_request(Ipv4Addr::new(192, 168, 0, 2), Ipv4Addr::new(10, 9, 9, 9));
    device.send(&framed(&request)).unwrap();

    // Forwarded unmodified.
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), request);
}

#[test]
fn start_is_idempotent() {
    let (tun, _device) = tun_pair();
    tun.start().unwrap();
    tun.start().unwrap();
    assert!(tun.is_running());
}

#[test]
fn stop_ends_the_loop() {
    let (tun, _device) = tun_pair();
    tun.start().unwrap();
    assert!(tun.is_running());

    tun.stop();

    let deadline = Instant::now() + RECV_TIMEOUT;
    while tun.is_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!tun.is_running());
}

#[test]
fn mutators_work_before_start_and_after_stop() {
    let (tun, _device) = tun_pair();

    // Before start.
    tun.add_known_ip("10.0.0.1");
    tun.add_dns_entry("10.0.0.7", "pre.local");

    tun.start().unwrap();
    tun.stop();

    let deadline = Instant::now() + RECV_TIMEOUT;
    while tun.is_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    // After stop.
    tun.add_known_ips(["10.0.0.2", "10.0.0.3"]);
    tun.remove_known_ip("10.0.0.1");
    tun.add_dns_entry("10.0.0.7", "post.local");
    tun.remove_dns_entry("10.0.0.7");
}

#[test]
fn stats_track_traffic() {
    let (tun, device) = tun_pair();
    let rx = capture_outgoing(&tun);
    tun.start().unwrap();

    let packet = ipv4_packet(
        ipv4::proto::TCP,
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        &[0u8; 20],
    );
    device.send(&framed(&packet)).unwrap();
    rx.recv_timeout(RECV_TIMEOUT).unwrap();

    tun.write_packet(&packet);
    recv_frame(&device);

    let stats = tun.stats();
    assert_eq!(stats.packets_read, 1);
    assert_eq!(stats.packets_forwarded, 1);
    assert_eq!(stats.packets_written, 1);
    assert_eq!(stats.bytes_written, (packet.len() + TUN_HEADER_LEN) as u64);
}
