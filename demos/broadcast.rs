use floodlight::{broadcast::ServiceBuilder, discovery::BrowseEvent, net::IpVersion, ZeroconfBuilder};
use std::{
	net::{IpAddr, Ipv4Addr},
	str::FromStr,
};

fn main() {
	let (found_tx, found_rx) = std::sync::mpsc::sync_channel(1);

	let zeroconf = ZeroconfBuilder::new().loopback().spawn(IpVersion::V4).unwrap();

	let browser = zeroconf
		.browse("_floodlight._udp.local.", move |event: BrowseEvent| {
			if let BrowseEvent::Added(info) = event {
				found_tx.try_send(info).ok();
			}
		})
		.unwrap();

	let registration = zeroconf
		.register(
			ServiceBuilder::new("_floodlight._udp.local.", "HELLO-WORLD", 1234)
				.unwrap()
				.add_ip_address(IpAddr::V4(Ipv4Addr::from_str("192.168.1.69").unwrap()))
				.add_txt_truncated("key=value")
				.add_txt_truncated("key2=value2")
				.build()
				.unwrap(),
		)
		.unwrap();

	println!("Registered as {}", registration.registered());
	println!("Waiting for the browser to find it...");

	println!("{:#?}", found_rx.recv().unwrap());

	println!("Shutting down...");

	browser.cancel();
	zeroconf.shutdown().unwrap();

	println!("Done!");
}
