//! Probing and announcing of one registered service (RFC 6762 §8)

use super::{
	errors::RegisterError,
	registry::{Conflict, EntryId},
	service::ServiceRecords,
	AnnouncerState,
};
use crate::{
	dns::{Message, Name, Question, RecordType},
	engine::{wait_for_shutdown, Zeroconf},
	util,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Notify, time::Instant};

/// Re-announce once this share of the shortest TTL has elapsed.
const REANNOUNCE_PERCENT: u64 = 80;

enum Wait {
	Elapsed,
	Woken,
	Shutdown,
}

/// Sleeps until `deadline`, returning early if the registry wakes this announcer or the engine
/// shuts down.
async fn wait(zc: &Zeroconf, wake: &Notify, deadline: Instant) -> Wait {
	let mut shutdown = zc.shutdown_signal();
	tokio::select! {
		biased;
		_ = wait_for_shutdown(&mut shutdown) => Wait::Shutdown,
		_ = wake.notified() => Wait::Woken,
		_ = tokio::time::sleep_until(deadline) => Wait::Elapsed,
	}
}

/// Probes until a free instance name and host name are found, renaming whichever conflicts.
pub(super) async fn probe(zc: &Zeroconf, id: EntryId, wake: &Notify) -> Result<Name, RegisterError> {
	let registry = &zc.inner.registry;
	let timing = zc.timing();
	let service = registry.service(id).ok_or(RegisterError::Closed)?;

	let mut candidate = service.fullname();
	let mut host = service.hostname().clone();
	let (mut renames, mut host_renames) = (0, 0);
	loop {
		if !registry.set_candidate(id, candidate.clone(), host.clone()) {
			return Err(RegisterError::Closed);
		}

		let known = known_conflict(zc, id, &candidate, &host);
		let conflict = if known.any() {
			debug!(zc.logger(), "{candidate} on {host} is already known to be in use");
			known
		} else {
			registry.set_state(id, AnnouncerState::Probing);
			probe_once(zc, id, wake, &candidate, &host).await?
		};

		if !conflict.any() {
			return Ok(candidate);
		}

		if conflict.host {
			host_renames += 1;
			if host_renames > timing.max_renames {
				return Err(RegisterError::Conflict {
					name: host,
					attempts: host_renames - 1,
				});
			}
			info!(zc.logger(), "Host name conflict for {host}, renaming");
			host = service.renamed_host(host_renames + 1)?;
		}

		if conflict.instance {
			renames += 1;
			if renames > timing.max_renames {
				return Err(RegisterError::Conflict {
					name: candidate,
					attempts: renames - 1,
				});
			}
			info!(zc.logger(), "Name conflict for {candidate}, renaming");
			candidate = service.renamed(renames + 1)?;
		}
	}
}

/// Sends the probe queries for one pair of candidate names. Returns the conflicts detected.
async fn probe_once(zc: &Zeroconf, id: EntryId, wake: &Notify, candidate: &Name, host: &Name) -> Result<Conflict, RegisterError> {
	let registry = &zc.inner.registry;
	let timing = zc.timing();

	for n in 0..timing.probe_count {
		let records = registry.records(id).ok_or(RegisterError::Closed)?;
		trace!(zc.logger(), "Probe {} for {candidate}", n + 1);
		zc.send(&probe_message(candidate, host, &records), None).await?;

		let deadline = Instant::now() + timing.probe_interval;
		loop {
			match wait(zc, wake, deadline).await {
				Wait::Shutdown => return Err(RegisterError::Closed),
				Wait::Elapsed => break,
				Wait::Woken => {}
			}
			match registry.take_conflict(id) {
				None => return Err(RegisterError::Closed),
				Some(conflict) if conflict.any() => return Ok(conflict),
				Some(_) => {}
			}
		}

		match registry.take_conflict(id) {
			None => return Err(RegisterError::Closed),
			Some(conflict) if conflict.any() => return Ok(conflict),
			Some(_) => {}
		}
	}

	Ok(Conflict::default())
}

/// Conflicts visible before probing: a local registration, a cached SRV/TXT record with
/// different data for `name`, or a cached address for `host` that isn't ours.
fn known_conflict(zc: &Zeroconf, id: EntryId, name: &Name, host: &Name) -> Conflict {
	let registry = &zc.inner.registry;
	let mut conflict = registry.local_conflict(id);

	let records = match registry.records(id) {
		Some(records) => records,
		None => return conflict,
	};

	let cache = util::read(&zc.inner.cache);
	let instance_taken = [(RecordType::Srv, &records.srv), (RecordType::Txt, &records.txt)]
		.into_iter()
		.any(|(rtype, ours)| cache.get(name, rtype).iter().any(|cached| cached != ours));
	if instance_taken {
		conflict |= Conflict::INSTANCE;
	}

	let host_taken = [RecordType::A, RecordType::Aaaa]
		.into_iter()
		.any(|rtype| cache.get(host, rtype).iter().any(|cached| records.foreign_address(cached)));
	if host_taken {
		conflict |= Conflict::HOST;
	}

	conflict
}

fn probe_message(candidate: &Name, host: &Name, records: &ServiceRecords) -> Message {
	let mut probe = Message::query();
	probe.add_question(Question::new(candidate.clone(), RecordType::Any).with_unicast_response(true));
	probe.add_question(Question::new(host.clone(), RecordType::Any).with_unicast_response(true));
	for record in records.probe_authorities() {
		probe.add_authority(record.clone());
	}
	probe
}

fn announcement(records: &ServiceRecords) -> Message {
	let mut announcement = Message::response();
	for record in records.answers() {
		announcement.add_answer(record.clone());
	}
	for nsec in records.nsecs() {
		announcement.add_additional(nsec.clone());
	}
	announcement
}

/// Sends the first announcement right after probing succeeded.
pub(super) async fn announce_first(zc: &Zeroconf, id: EntryId) -> Result<(), RegisterError> {
	let registry = &zc.inner.registry;
	let records = registry.records(id).ok_or(RegisterError::Closed)?;
	if !registry.set_state(id, AnnouncerState::Announcing) {
		return Err(RegisterError::Closed);
	}
	zc.send(&announcement(&records), None).await?;
	Ok(())
}

/// Sends the remaining announcements, then re-announces periodically until the service is
/// withdrawn or the engine shuts down.
pub(super) async fn announce_loop(zc: Zeroconf, id: EntryId, wake: Arc<Notify>) {
	let registry = &zc.inner.registry;
	let timing = zc.timing().clone();

	for _ in 1..timing.announce_count {
		if !sleep_while_registered(&zc, id, &wake, Instant::now() + timing.announce_interval).await {
			return;
		}
		if !announce(&zc, id).await {
			return;
		}
	}

	if !registry.set_state(id, AnnouncerState::Registered) {
		return;
	}

	loop {
		let min_ttl = match registry.records(id) {
			Some(records) => records.min_ttl(),
			None => return,
		};
		let period = Duration::from_millis(min_ttl as u64 * REANNOUNCE_PERCENT * 10).max(timing.announce_interval);

		if !sleep_while_registered(&zc, id, &wake, Instant::now() + period).await {
			return;
		}
		trace!(zc.logger(), "Refreshing announcement");
		if !announce(&zc, id).await {
			return;
		}
	}
}

/// Returns `false` if the service went away or the engine is shutting down.
async fn sleep_while_registered(zc: &Zeroconf, id: EntryId, wake: &Notify, deadline: Instant) -> bool {
	loop {
		match wait(zc, wake, deadline).await {
			Wait::Shutdown => return false,
			Wait::Elapsed => return zc.inner.registry.records(id).is_some(),
			Wait::Woken => {
				if zc.inner.registry.records(id).is_none() {
					return false;
				}
			}
		}
	}
}

async fn announce(zc: &Zeroconf, id: EntryId) -> bool {
	let records = match zc.inner.registry.records(id) {
		Some(records) => records,
		None => return false,
	};
	match zc.send(&announcement(&records), None).await {
		Ok(()) => true,
		Err(err) => {
			warn!(zc.logger(), "Failed to announce: {err}");
			!zc.is_closing()
		}
	}
}
