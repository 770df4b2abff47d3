use floodlight::{discovery::BrowseEvent, net::IpVersion, ZeroconfBuilder};

fn main() {
	let (tx, rx) = std::sync::mpsc::channel();

	let zeroconf = ZeroconfBuilder::new().spawn(IpVersion::Both).unwrap();
	let _browser = zeroconf
		.browse("_googlecast._tcp.local.", move |event: BrowseEvent| {
			tx.send(event).ok();
		})
		.unwrap();

	for event in rx {
		match event {
			BrowseEvent::Added(info) => {
				println!(
					"Found Chromecast {} at {}:{} ({:?})",
					info.txt.get_str("fn").unwrap_or_else(|| info.instance_name()),
					info.server,
					info.port,
					info.addresses
				);
			}

			BrowseEvent::Updated(info) => {
				println!("Chromecast {} now at {:?}", info.instance_name(), info.addresses);
			}

			BrowseEvent::Removed { fullname, .. } => {
				println!("Chromecast {fullname} has gone away");
			}
		}
	}
}
