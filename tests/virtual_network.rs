//! Engines talking over an in-memory network with a paused clock

use floodlight::{
	broadcast::{AnnouncerState, Service, ServiceBuilder},
	discovery::BrowseEvent,
	dns::{DnsRecord, Message, Name, Nsec, RData, RecordType, Srv, Txt},
	errors::{RegisterError, ResolveError},
	transport::{MemoryNetwork, MemoryTransport, Transport},
	Logger, Timing, Zeroconf, ZeroconfBuilder,
};
use std::{
	net::{IpAddr, Ipv4Addr, Ipv6Addr},
	sync::Arc,
	time::Duration,
};
use tokio::{sync::mpsc, time::Instant};

const IPP: &str = "_ipp._tcp.local.";

fn init_logging() {
	simple_logger::init_with_level(log::Level::Debug).ok();
}

fn engine(network: &MemoryNetwork, name: &str) -> Zeroconf {
	engine_with_timing(network, name, Timing::default())
}

fn engine_with_timing(network: &MemoryNetwork, name: &str, timing: Timing) -> Zeroconf {
	ZeroconfBuilder::new()
		.logger(Logger::new(name.to_string()))
		.timing(timing)
		.open_with_transports([Arc::new(network.endpoint()) as Arc<dyn Transport>])
		.unwrap()
}

fn printer(instance: &str, host: &str, port: u16) -> Service {
	ServiceBuilder::new(IPP, instance, port)
		.unwrap()
		.hostname(host)
		.unwrap()
		.add_ip_address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
		.add_txt("path=/")
		.build()
		.unwrap()
}

/// A printer with the builder's default host name, `printer.local.`
fn default_printer(addr: Ipv4Addr) -> Service {
	ServiceBuilder::new(IPP, "printer", 631)
		.unwrap()
		.add_ip_address(IpAddr::V4(addr))
		.add_txt("path=/")
		.build()
		.unwrap()
}

fn name(name: &str) -> Name {
	Name::parse(name).unwrap()
}

fn events() -> (impl Fn(BrowseEvent) + Send + Sync + 'static, mpsc::UnboundedReceiver<BrowseEvent>) {
	let (tx, rx) = mpsc::unbounded_channel();
	(
		move |event: BrowseEvent| {
			tx.send(event).ok();
		},
		rx,
	)
}

async fn send_raw(endpoint: &MemoryTransport, message: &Message) {
	endpoint.send_multicast(&message.encode().unwrap()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn printer_is_found_exactly_once() {
	init_logging();

	let network = MemoryNetwork::new();
	let server = engine(&network, "server");
	let client = engine(&network, "client");

	let (listener, mut rx) = events();
	let _browser = client.browse(IPP, listener).unwrap();

	let start = Instant::now();
	let registration = server.register(printer("printer", "printer.local.", 631)).await.unwrap();
	assert!(!registration.renamed());
	assert_eq!(registration.registered(), &name("printer._ipp._tcp.local."));

	let event = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
	assert!(start.elapsed() <= Duration::from_secs(3));
	match event {
		BrowseEvent::Added(info) => {
			assert_eq!(info.fullname, name("printer._ipp._tcp.local."));
			assert_eq!(info.port, 631);
			assert_eq!(info.server, name("printer.local."));
			assert_eq!(info.txt.get_str("path"), Some("/"));
			assert!(info.addresses.contains(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))));
		}
		other => panic!("expected Added, got {other:?}"),
	}

	// Further announcements and the client's queries must not produce more events
	tokio::time::sleep(Duration::from_secs(30)).await;
	assert!(rx.try_recv().is_err());
	assert_eq!(server.service_state(registration.registered()), Some(AnnouncerState::Registered));

	assert!(server.unregister(registration.registered()).await.unwrap());
	assert!(!server.unregister(registration.registered()).await.unwrap());
	match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap() {
		BrowseEvent::Removed { service_type, fullname } => {
			assert_eq!(service_type, name(IPP));
			assert_eq!(fullname, name("printer._ipp._tcp.local."));
		}
		other => panic!("expected Removed, got {other:?}"),
	}
	assert_eq!(server.service_state(registration.registered()), Some(AnnouncerState::Closed));

	server.close().await;
	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn announcing_then_registered() {
	let network = MemoryNetwork::new();
	let server = engine(&network, "server");

	let start = Instant::now();
	let registration = server.register(printer("printer", "printer.local.", 631)).await.unwrap();

	// Three probes, 250 ms apart
	let elapsed = start.elapsed();
	assert!(elapsed >= Duration::from_millis(750) && elapsed < Duration::from_secs(1), "{elapsed:?}");
	assert_eq!(server.service_state(registration.registered()), Some(AnnouncerState::Announcing));

	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert_eq!(server.service_state(registration.registered()), Some(AnnouncerState::Registered));

	server.close().await;
	assert!(matches!(
		server.register(printer("other", "other.local.", 80)).await,
		Err(RegisterError::Closed)
	));
}

#[tokio::test(start_paused = true)]
async fn taken_name_is_renamed() {
	init_logging();

	let network = MemoryNetwork::new();
	let first = engine(&network, "first");
	let second = engine(&network, "second");

	first.register(printer("printer", "first.local.", 631)).await.unwrap();
	let registration = second.register(printer("printer", "second.local.", 632)).await.unwrap();

	assert!(registration.renamed());
	assert_eq!(registration.requested(), &name("printer._ipp._tcp.local."));
	assert_eq!(registration.registered(), &name("printer (2)._ipp._tcp.local."));

	first.close().await;
	second.close().await;
}

#[tokio::test(start_paused = true)]
async fn simultaneous_probes_are_tie_broken() {
	init_logging();

	let network = MemoryNetwork::new();
	let first = engine(&network, "first");
	let second = engine(&network, "second");

	let (a, b) = tokio::join!(
		first.register(printer("printer", "first.local.", 631)),
		second.register(printer("printer", "second.local.", 632)),
	);
	let (a, b) = (a.unwrap(), b.unwrap());

	// The lexicographically earlier SRV data loses
	assert_eq!(a.registered(), &name("printer (2)._ipp._tcp.local."));
	assert_eq!(b.registered(), &name("printer._ipp._tcp.local."));

	first.close().await;
	second.close().await;
}

#[tokio::test(start_paused = true)]
async fn default_host_names_are_claimed_once() {
	init_logging();

	let network = MemoryNetwork::new();
	let first = engine(&network, "first");
	let second = engine(&network, "second");
	let client = engine(&network, "client");

	let a = first.register(default_printer(Ipv4Addr::new(192, 168, 1, 1))).await.unwrap();
	let b = second.register(default_printer(Ipv4Addr::new(192, 168, 1, 2))).await.unwrap();
	assert_eq!(a.registered(), &name("printer._ipp._tcp.local."));
	assert_eq!(b.registered(), &name("printer (2)._ipp._tcp.local."));

	let info = client.resolve(IPP, a.registered(), Duration::from_secs(3)).await.unwrap();
	assert_eq!(info.server, name("printer.local."));
	assert_eq!(info.addresses, [IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))].into_iter().collect());

	let info = client.resolve(IPP, b.registered(), Duration::from_secs(3)).await.unwrap();
	assert_eq!(info.server, name("printer-2.local."));
	assert_eq!(info.addresses, [IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))].into_iter().collect());

	first.close().await;
	second.close().await;
	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn simultaneous_default_host_names_are_tie_broken() {
	init_logging();

	let network = MemoryNetwork::new();
	let first = engine(&network, "first");
	let second = engine(&network, "second");
	let client = engine(&network, "client");

	let (a, b) = tokio::join!(
		first.register(default_printer(Ipv4Addr::new(192, 168, 1, 1))),
		second.register(default_printer(Ipv4Addr::new(192, 168, 1, 2))),
	);
	let (a, b) = (a.unwrap(), b.unwrap());
	assert_ne!(a.registered(), b.registered());

	let mut servers = Vec::new();
	for registration in [&a, &b] {
		let info = client.resolve(IPP, registration.registered(), Duration::from_secs(3)).await.unwrap();
		assert_eq!(info.addresses.len(), 1, "{info:?}");
		servers.push(info.server);
	}
	assert_ne!(servers[0], servers[1]);

	first.close().await;
	second.close().await;
	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn local_duplicates_are_renamed() {
	let network = MemoryNetwork::new();
	let server = engine(&network, "server");

	let (a, b) = tokio::join!(
		server.register(printer("printer", "printer.local.", 631)),
		server.register(printer("printer", "printer.local.", 632)),
	);
	let mut registered = [a.unwrap().registered().to_string(), b.unwrap().registered().to_string()];
	registered.sort();
	assert_eq!(registered, ["printer (2)._ipp._tcp.local.", "printer._ipp._tcp.local."]);

	server.close().await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_too_many_renames() {
	let network = MemoryNetwork::new();
	let squatter = engine(&network, "squatter");
	let server = engine_with_timing(
		&network,
		"server",
		Timing {
			max_renames: 1,
			..Timing::default()
		},
	);

	squatter.register(printer("printer", "squatter.local.", 1)).await.unwrap();
	squatter.register(printer("printer (2)", "squatter.local.", 2)).await.unwrap();

	match server.register(printer("printer", "printer.local.", 631)).await {
		Err(RegisterError::Conflict { name: last, attempts }) => {
			assert_eq!(last, name("printer (2)._ipp._tcp.local."));
			assert_eq!(attempts, 1);
		}
		other => panic!("expected a conflict, got {other:?}"),
	}

	squatter.close().await;
	server.close().await;
}

#[tokio::test(start_paused = true)]
async fn closing_says_goodbye() {
	let network = MemoryNetwork::new();
	let server = engine(&network, "server");
	let client = engine(&network, "client");

	let (listener, mut rx) = events();
	let browser = client.browse(IPP, listener).unwrap();

	server.register(printer("printer", "printer.local.", 631)).await.unwrap();
	assert!(matches!(rx.recv().await, Some(BrowseEvent::Added(_))));

	server.close().await;
	assert!(matches!(
		tokio::time::timeout(Duration::from_secs(1), rx.recv()).await,
		Ok(Some(BrowseEvent::Removed { .. }))
	));

	browser.cancel();
	browser.cancel();
	assert!(browser.is_cancelled());
	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn resolves_every_address() {
	let network = MemoryNetwork::new();
	let server = engine(&network, "server");

	let service = ServiceBuilder::new(IPP, "printer", 631)
		.unwrap()
		.add_ip_address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
		.add_ip_address(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x20)))
		.add_txt("path=/")
		.build()
		.unwrap();
	server.register(service).await.unwrap();

	// Started after the announcements, so the answer has to be queried for
	let client = engine(&network, "client");
	let info = client.resolve(IPP, "printer._ipp._tcp.local.", Duration::from_secs(3)).await.unwrap();
	assert_eq!(info.port, 631);
	assert_eq!(info.addresses.len(), 2);
	assert_eq!(info.instance_name(), "printer");

	server.close().await;
	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn resolve_times_out() {
	let network = MemoryNetwork::new();
	let client = engine(&network, "client");

	let start = Instant::now();
	let result = client.resolve(IPP, "ghost._ipp._tcp.local.", Duration::from_secs(2)).await;
	assert!(matches!(result, Err(ResolveError::Timeout)), "{result:?}");
	let elapsed = start.elapsed();
	assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100), "{elapsed:?}");

	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn resolve_reports_nonexistence() {
	let network = MemoryNetwork::new();
	let client = engine(&network, "client");
	let raw = network.endpoint();

	let ghost = name("ghost._ipp._tcp.local.");
	let mut response = Message::response();
	response.add_answer(
		DnsRecord::new(
			ghost.clone(),
			120,
			RData::Nsec(Nsec {
				next_domain: ghost.clone(),
				types: [RecordType::Txt].into_iter().collect(),
			}),
		)
		.with_cache_flush(true),
	);
	send_raw(&raw, &response).await;
	tokio::time::sleep(Duration::from_millis(10)).await;

	let result = client.resolve(IPP, &ghost, Duration::from_secs(2)).await;
	assert!(matches!(result, Err(ResolveError::NonExistent)), "{result:?}");

	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn resolve_without_deadline() {
	let network = MemoryNetwork::new();
	let server = engine(&network, "server");
	let client = engine(&network, "client");

	let resolving = tokio::spawn({
		let client = client.clone();
		async move { client.resolve(IPP, "printer._ipp._tcp.local.", Duration::MAX).await }
	});

	tokio::time::sleep(Duration::from_secs(10)).await;
	server.register(printer("printer", "printer.local.", 631)).await.unwrap();

	let info = tokio::time::timeout(Duration::from_secs(5), resolving).await.unwrap().unwrap().unwrap();
	assert_eq!(info.port, 631);

	server.close().await;
	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn resolve_is_cancelled_by_close() {
	let network = MemoryNetwork::new();
	let client = engine(&network, "client");

	let resolving = tokio::spawn({
		let client = client.clone();
		async move { client.resolve(IPP, "ghost._ipp._tcp.local.", Duration::from_secs(60)).await }
	});

	tokio::time::sleep(Duration::from_secs(1)).await;
	client.close().await;

	assert!(matches!(resolving.await.unwrap(), Err(ResolveError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn browser_refreshes_and_forgets() {
	init_logging();

	let network = MemoryNetwork::new();
	let client = engine_with_timing(
		&network,
		"client",
		Timing {
			initial_query_interval: Duration::from_secs(60 * 60),
			..Timing::default()
		},
	);
	let raw = Arc::new(network.endpoint());

	// Timestamps of every PTR query the raw endpoint sees
	let (query_tx, mut queries) = mpsc::unbounded_channel();
	tokio::spawn({
		let raw = raw.clone();
		async move {
			let mut buf = vec![0u8; 9000];
			while let Ok((len, _)) = raw.recv_from(&mut buf).await {
				let message = match Message::decode(&buf[..len]) {
					Ok(message) if message.is_query() => message,
					_ => continue,
				};
				if message.questions.iter().any(|question| question.qtype == RecordType::Ptr) {
					query_tx.send(Instant::now()).ok();
				}
			}
		}
	});

	let (listener, mut rx) = events();
	let _browser = client.browse(IPP, listener).unwrap();

	// The initial query
	let first = queries.recv().await.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(first <= Instant::now());

	let instance = name("shortlived._ipp._tcp.local.");
	let host = name("shortlived.local.");
	let mut response = Message::response();
	response.add_answer(DnsRecord::new(name(IPP), 10, RData::Ptr(instance.clone())));
	response.add_additional(
		DnsRecord::new(
			instance.clone(),
			120,
			RData::Srv(Srv {
				priority: 0,
				weight: 0,
				port: 8080,
				target: host.clone(),
			}),
		)
		.with_cache_flush(true),
	);
	response.add_additional(DnsRecord::new(instance.clone(), 120, RData::Txt(Txt(vec![b"v=1".to_vec()]))).with_cache_flush(true));
	response.add_additional(DnsRecord::new(host, 120, RData::A(Ipv4Addr::new(10, 9, 9, 9))).with_cache_flush(true));

	send_raw(&raw, &response).await;
	let announced = Instant::now();

	assert!(matches!(rx.recv().await, Some(BrowseEvent::Added(_))));

	let removed = match rx.recv().await {
		Some(BrowseEvent::Removed { fullname, .. }) => {
			assert_eq!(fullname, instance);
			Instant::now()
		}
		other => panic!("expected Removed, got {other:?}"),
	};
	assert!(removed - announced >= Duration::from_secs(10) && removed - announced <= Duration::from_secs(11));

	// Nothing is refreshed once the instance is gone
	tokio::time::sleep(Duration::from_secs(30)).await;

	let mut refreshes = Vec::new();
	while let Ok(at) = queries.try_recv() {
		refreshes.push(at - announced);
	}

	let expected = [Duration::from_millis(5000), Duration::from_millis(8500), Duration::from_millis(9500)];
	assert_eq!(refreshes.len(), expected.len(), "{refreshes:?}");
	for (actual, expected) in refreshes.iter().zip(expected) {
		let diff = if *actual > expected { *actual - expected } else { expected - *actual };
		assert!(diff <= Duration::from_millis(100), "refresh at {actual:?}, expected {expected:?}");
	}

	client.close().await;
}

#[tokio::test(start_paused = true)]
async fn requeries_carry_known_answers() {
	let network = MemoryNetwork::new();
	let client = engine_with_timing(
		&network,
		"client",
		Timing {
			initial_query_interval: Duration::from_secs(20),
			..Timing::default()
		},
	);
	let raw = Arc::new(network.endpoint());

	let (query_tx, mut queries) = mpsc::unbounded_channel();
	tokio::spawn({
		let raw = raw.clone();
		async move {
			let mut buf = vec![0u8; 9000];
			while let Ok((len, _)) = raw.recv_from(&mut buf).await {
				match Message::decode(&buf[..len]) {
					Ok(message) if message.is_query() && message.questions.iter().any(|question| question.qtype == RecordType::Ptr) => {
						query_tx.send((Instant::now(), message)).ok();
					}
					_ => continue,
				}
			}
		}
	});

	let (listener, _rx) = events();
	let _browser = client.browse(IPP, listener).unwrap();

	let (start, initial) = queries.recv().await.unwrap();
	assert!(initial.answers.is_empty());
	tokio::time::sleep(Duration::from_millis(100)).await;

	let long = name("long._ipp._tcp.local.");
	let short = name("short._ipp._tcp.local.");
	let mut response = Message::response();
	response.add_answer(DnsRecord::new(name(IPP), 4500, RData::Ptr(long.clone())));
	response.add_answer(DnsRecord::new(name(IPP), 30, RData::Ptr(short.clone())));
	send_raw(&raw, &response).await;

	// The next scheduled query, 20 s in: the short-lived PTR is past half of its TTL by then
	tokio::time::sleep(Duration::from_secs(21)).await;
	let mut requery = None;
	while let Ok((at, message)) = queries.try_recv() {
		if at - start >= Duration::from_millis(19900) && at - start <= Duration::from_millis(20100) {
			requery = Some(message);
		}
	}
	let requery = requery.expect("no query 20 s after the first");

	assert_eq!(requery.answers.len(), 1, "{:?}", requery.answers);
	let known = &requery.answers[0];
	assert_eq!(known.name(), &name(IPP));
	assert_eq!(known.data(), &RData::Ptr(long));
	assert!((4479..=4480).contains(&known.ttl()), "{}", known.ttl());

	client.close().await;
}
