//! End-to-end tests against loopback collectors.

use std::{
    io::Read as _,
    net::{TcpListener, UdpSocket},
    thread,
    time::Duration,
};

use logwire::{
    Destination, LogContext, LogSettings, Logstash, MetricSink as _, Protocol, Severity,
    StatsdClient, Tracer, TransportError, UDP_MAX_PAYLOAD,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn udp_collector() -> (UdpSocket, Destination) {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
    let port = server.local_addr().unwrap().port();
    (server, Destination::new("127.0.0.1", port, Protocol::Udp).unwrap())
}

fn recv_datagram(server: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; UDP_MAX_PAYLOAD + 1];
    let (len, _) = server.recv_from(&mut buf).unwrap();
    buf.truncate(len);
    buf
}

#[test]
fn log_event_round_trips_over_udp() {
    let (server, destination) = udp_collector();

    let settings = LogSettings::new("checkout")
        .unwrap()
        .with_build("deadbeef")
        .with_channel("payments");
    let mut logger = Logstash::new(destination, settings);

    let context = LogContext::new().field("order_id", 1234).field("app", "spoofed");
    let sent = logger.log(Severity::Info, "payment accepted|card=visa", context).unwrap();

    let datagram = recv_datagram(&server);
    assert_eq!(sent, datagram.len());
    assert_eq!(datagram.last(), Some(&b'\n'));

    let event: serde_json::Value = serde_json::from_slice(&datagram).unwrap();
    assert_eq!(event["message"], "payment accepted");
    assert_eq!(event["log_data"], "card=visa");
    assert_eq!(event["severity"], "info");
    assert_eq!(event["log_sequence"], 1);
    assert_eq!(event["app"], "checkout");
    assert_eq!(event["build"], "deadbeef");
    assert_eq!(event["channel"], "payments");
    assert_eq!(event["facility"], "lgstsh");
    assert_eq!(event["order_id"], 1234);
    assert_eq!(event["message_id"].as_str().unwrap().len(), 10);
}

#[test]
fn oversized_udp_log_event_is_a_hard_failure() {
    let (_server, destination) = udp_collector();

    let mut logger = Logstash::new(destination, LogSettings::new("checkout").unwrap());

    let context = LogContext::new().field("padding", "x".repeat(UDP_MAX_PAYLOAD));
    let error = logger.log(Severity::Info, "too big", context).unwrap_err();
    assert!(matches!(
        error,
        logwire::LogError::Transport(TransportError::PacketTooLarge { .. })
    ));
}

#[test]
fn log_events_stream_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let destination = Destination::new("127.0.0.1", port, Protocol::Tcp).unwrap();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).unwrap();
        buf
    });

    let mut logger = Logstash::new(destination, LogSettings::new("checkout").unwrap());
    logger.log(Severity::Warning, "first", LogContext::new()).unwrap();
    logger.log(Severity::Warning, "second", LogContext::new()).unwrap();
    logger.close();
    drop(logger);

    let received = reader.join().unwrap();
    let events: Vec<serde_json::Value> = received
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["message"], "first");
    assert_eq!(events[0]["log_sequence"], 1);
    assert_eq!(events[1]["message"], "second");
    assert_eq!(events[1]["log_sequence"], 2);
    assert_eq!(events[0]["instance_id"], events[1]["instance_id"]);
}

#[test]
fn statsd_lines_stream_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let destination = Destination::new("127.0.0.1", port, Protocol::Tcp).unwrap();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).unwrap();
        buf
    });

    let mut client = StatsdClient::new(destination, "myapp");
    client.increment("requests").unwrap();
    client.timing("db.query", 250).unwrap();
    client.gauge("queue_depth", 42).unwrap();
    client.close();
    drop(client);

    let received = reader.join().unwrap();
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(
        lines,
        vec![
            "projects.myapp.requests:1|c",
            "projects.myapp.db.query:250|ms",
            "projects.myapp.queue_depth:42|g",
        ]
    );
}

#[test]
fn tracer_reports_through_the_statsd_path() {
    let (server, destination) = udp_collector();

    let mut statsd = StatsdClient::new(destination, "myapp");
    let mut tracer = Tracer::new();
    tracer.start("render cart");
    tracer.end(None).unwrap();

    tracer.report(&mut statsd);

    let mut lines = Vec::new();
    for _ in 0..3 {
        lines.push(String::from_utf8(recv_datagram(&server)).unwrap());
    }

    assert_eq!(lines[0], "projects.myapp.all_hosts.render-cart:1|c");
    assert!(lines[1].starts_with("projects.myapp.all_hosts.render-cart:"));
    assert!(lines[1].ends_with("|ms"));
    assert!(lines[2].starts_with("projects.myapp.all_hosts.memory_usage:"));
    assert!(lines[2].ends_with("|g"));
}

#[test]
fn connect_failure_surfaces_through_the_log_path() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let destination = Destination::new("127.0.0.1", port, Protocol::Tcp).unwrap();
    let mut logger = Logstash::new(destination, LogSettings::new("checkout").unwrap());

    let error = logger.log(Severity::Error, "unreachable", LogContext::new()).unwrap_err();
    assert!(matches!(
        error,
        logwire::LogError::Transport(TransportError::Connection(_))
    ));
}
