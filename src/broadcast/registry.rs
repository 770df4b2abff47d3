//! Locally registered services and the query responder

use super::{
	service::{Service, ServiceRecords},
	AnnouncerState,
};
use crate::{
	dns::{canonical_rdata, DnsRecord, Message, Name, RecordType},
	logging::Logger,
	util, MDNS_PORT,
};
use std::{
	cmp::Ordering,
	collections::HashSet,
	net::SocketAddr,
	sync::{
		atomic::{AtomicU64, Ordering as AtomicOrdering},
		Arc, Mutex,
	},
};
use tokio::{sync::Notify, time::Instant};

/// Legacy (one-shot) queriers are sent TTLs no longer than this (RFC 6762 §6.7).
const LEGACY_MAX_TTL: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Which of an entry's names another host claims.
pub(crate) struct Conflict {
	pub(crate) instance: bool,
	pub(crate) host: bool,
}
impl Conflict {
	pub(crate) const INSTANCE: Self = Self { instance: true, host: false };
	pub(crate) const HOST: Self = Self { instance: false, host: true };

	#[inline]
	pub(crate) fn any(&self) -> bool {
		self.instance || self.host
	}
}
impl std::ops::BitOrAssign for Conflict {
	fn bitor_assign(&mut self, rhs: Self) {
		self.instance |= rhs.instance;
		self.host |= rhs.host;
	}
}

#[derive(Debug)]
struct Entry {
	id: EntryId,
	service: Service,
	/// The candidate (while probing) or registered instance name
	name: Name,
	records: ServiceRecords,
	state: AnnouncerState,
	conflict: Conflict,
	wake: Arc<Notify>,
}
impl Entry {
	#[inline]
	fn is_published(&self) -> bool {
		matches!(self.state, AnnouncerState::Announcing | AnnouncerState::Registered)
	}

	#[inline]
	fn is_live(&self) -> bool {
		!matches!(self.state, AnnouncerState::Goodbye | AnnouncerState::Closed)
	}

	#[inline(always)]
	fn host(&self) -> &Name {
		self.service.hostname()
	}

	fn flag_conflict(&mut self, conflict: Conflict) {
		self.conflict |= conflict;
		self.wake.notify_one();
	}
}

#[derive(Debug, Default)]
/// Every service registered with one engine, shared by the announcer tasks and the receive path.
pub(crate) struct Registry {
	entries: Mutex<Vec<Entry>>,
	next_id: AtomicU64,
}
impl Registry {
	/// Adds `service` in the [`Init`](AnnouncerState::Init) state under its requested name.
	pub(crate) fn insert(&self, service: Service) -> (EntryId, Arc<Notify>) {
		let id = EntryId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
		let wake = Arc::new(Notify::new());
		let name = service.fullname();

		let mut entries = util::lock(&self.entries);
		entries.retain(|entry| entry.state != AnnouncerState::Closed);
		entries.push(Entry {
			id,
			records: service.records(&name),
			service,
			name,
			state: AnnouncerState::Init,
			conflict: Conflict::default(),
			wake: wake.clone(),
		});

		(id, wake)
	}

	fn with_entry<R>(&self, id: EntryId, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
		util::lock(&self.entries)
			.iter_mut()
			.find(|entry| entry.id == id && entry.is_live())
			.map(f)
	}

	/// The service registered as `id`, if it has not been withdrawn.
	pub(crate) fn service(&self, id: EntryId) -> Option<Service> {
		self.with_entry(id, |entry| entry.service.clone())
	}

	/// Moves entry `id` to a new candidate instance and host name. Returns `false` if it was
	/// withdrawn.
	pub(crate) fn set_candidate(&self, id: EntryId, name: Name, host: Name) -> bool {
		self.with_entry(id, |entry| {
			entry.service.set_hostname(host);
			entry.records = entry.service.records(&name);
			entry.name = name;
			entry.conflict = Conflict::default();
		})
		.is_some()
	}

	pub(crate) fn set_state(&self, id: EntryId, state: AnnouncerState) -> bool {
		self.with_entry(id, |entry| entry.state = state).is_some()
	}

	/// Reads and clears the conflict flags. `None` if the entry was withdrawn.
	pub(crate) fn take_conflict(&self, id: EntryId) -> Option<Conflict> {
		self.with_entry(id, |entry| std::mem::take(&mut entry.conflict))
	}

	pub(crate) fn records(&self, id: EntryId) -> Option<ServiceRecords> {
		self.with_entry(id, |entry| entry.records.clone())
	}

	pub(crate) fn state_of(&self, name: &Name) -> Option<AnnouncerState> {
		util::lock(&self.entries)
			.iter()
			.rev()
			.find(|entry| entry.name == *name)
			.map(|entry| entry.state)
	}

	/// Which of entry `id`'s candidate names another live local registration already uses.
	/// Sharing the host name is fine as long as the addresses agree.
	pub(crate) fn local_conflict(&self, id: EntryId) -> Conflict {
		let entries = util::lock(&self.entries);
		let ours = match entries.iter().find(|entry| entry.id == id) {
			Some(ours) => ours,
			None => return Conflict::default(),
		};

		let mut conflict = Conflict::default();
		for other in entries.iter().filter(|other| other.id != id && other.is_live()) {
			if other.name == ours.name {
				conflict |= Conflict::INSTANCE;
			}
			if other.host() == ours.host() && other.service.addresses() != ours.service.addresses() {
				conflict |= Conflict::HOST;
			}
		}
		conflict
	}

	/// Withdraws the registration of `name`.
	///
	/// Returns `None` if no such service is registered, otherwise the goodbye to send (only
	/// services that were already announced need one).
	pub(crate) fn withdraw(&self, name: &Name) -> Option<Option<Message>> {
		let mut entries = util::lock(&self.entries);
		let index = entries.iter().position(|entry| entry.is_live() && entry.name == *name)?;

		let was_published = entries[index].is_published();
		entries[index].state = AnnouncerState::Goodbye;
		entries[index].wake.notify_one();

		let goodbye = was_published.then(|| {
			let mut said = HashSet::new();
			goodbye_message(&entries, index, &mut said)
		});

		entries[index].state = AnnouncerState::Closed;
		Some(goodbye)
	}

	/// Drops a registration that never got announced.
	pub(crate) fn discard(&self, id: EntryId) {
		if let Some(entry) = util::lock(&self.entries).iter_mut().find(|entry| entry.id == id) {
			entry.state = AnnouncerState::Closed;
			entry.wake.notify_one();
		}
	}

	/// Goodbyes for every announced service, used when the engine closes. All entries end up
	/// [`Closed`](AnnouncerState::Closed).
	pub(crate) fn goodbyes(&self) -> Vec<Message> {
		let mut entries = util::lock(&self.entries);

		for entry in entries.iter_mut().filter(|entry| entry.is_published()) {
			entry.state = AnnouncerState::Goodbye;
		}

		let mut said = HashSet::new();
		let goodbyes = (0..entries.len())
			.filter(|index| entries[*index].state == AnnouncerState::Goodbye)
			.map(|index| goodbye_message(&entries, index, &mut said))
			.filter(|goodbye| !goodbye.answers.is_empty())
			.collect();

		for entry in entries.iter_mut() {
			entry.state = AnnouncerState::Closed;
			entry.wake.notify_one();
		}

		goodbyes
	}

	/// Checks an incoming query for a simultaneous probe of one of our candidate names.
	///
	/// Both sides compare the records they propose for the name (RFC 6762 §8.2); the side whose
	/// records sort first loses and has to pick another name. Instance and host names are
	/// compared separately. Our own probes compare equal and are ignored.
	pub(crate) fn observe_query(&self, query: &Message, logger: &Logger) {
		if query.authorities.is_empty() {
			return;
		}

		let mut entries = util::lock(&self.entries);
		for entry in entries.iter_mut().filter(|entry| entry.state == AnnouncerState::Probing) {
			let names = [(entry.name.clone(), Conflict::INSTANCE), (entry.host().clone(), Conflict::HOST)];
			for (name, conflict) in names {
				if !query.questions.iter().any(|question| question.name == name) {
					continue;
				}

				let theirs = tie_break_key(query.authorities.iter().filter(|record| *record.name() == name));
				if theirs.is_empty() {
					continue;
				}

				let ours = tie_break_key(entry.records.probe_authorities().filter(|record| *record.name() == name));
				if ours.cmp(&theirs) == Ordering::Less {
					debug!(logger, "Lost simultaneous probe tie-break for {name}");
					entry.flag_conflict(conflict);
				}
			}
		}
	}

	/// Checks an incoming response for records that claim one of our names with other data.
	pub(crate) fn observe_response(&self, response: &Message, logger: &Logger) {
		let mut entries = util::lock(&self.entries);

		for record in response.answers.iter().chain(response.additionals.iter()) {
			if record.ttl() == 0 {
				continue;
			}

			for entry in entries.iter_mut().filter(|entry| entry.is_live()) {
				let (name, conflict) = match record.record_type() {
					RecordType::Srv | RecordType::Txt if *record.name() == entry.name => {
						let ours = match record.record_type() {
							RecordType::Srv => &entry.records.srv,
							_ => &entry.records.txt,
						};
						if record == ours {
							continue;
						}
						(entry.name.clone(), Conflict::INSTANCE)
					}
					RecordType::A | RecordType::Aaaa if record.cache_flush() && entry.records.foreign_address(record) => {
						(entry.host().clone(), Conflict::HOST)
					}
					_ => continue,
				};

				match entry.state {
					AnnouncerState::Probing => {
						debug!(logger, "{name} is already in use on the network");
						entry.flag_conflict(conflict);
					}
					AnnouncerState::Announcing | AnnouncerState::Registered => {
						warn!(logger, "Another host answers for our registered name {name}");
					}
					_ => {}
				}
			}
		}
	}

	/// Builds the responses to `query`, each paired with its destination (`None` for multicast).
	pub(crate) fn answer(&self, query: &Message, from: SocketAddr, now: Instant) -> Vec<(Message, Option<SocketAddr>)> {
		if query.questions.is_empty() {
			return Vec::new();
		}

		let legacy = from.port() != MDNS_PORT;

		let mut multicast = Message::response();
		let mut unicast = Message::response();

		{
			let entries = util::lock(&self.entries);
			for question in query.questions.iter() {
				let response = if legacy || question.unicast_response { &mut unicast } else { &mut multicast };

				for entry in entries.iter().filter(|entry| entry.is_published()) {
					let records = &entry.records;
					let mut answered = false;

					for record in records.answers().filter(|record| question.is_answered_by(record)) {
						answered = true;
						if query.answers.iter().any(|known| record.suppressed_by(known)) || response.answers.contains(record) {
							continue;
						}
						response.add_answer(record.clone().with_created(now));
						for additional in records.additionals_for(record) {
							response.add_additional(additional.clone().with_created(now));
						}
					}

					// Negative answers for names we own (RFC 6762 §6.1)
					if !answered && question.qtype != RecordType::Any {
						for nsec in records.nsecs() {
							if *nsec.name() == question.name && !response.answers.contains(nsec) {
								response.add_answer(nsec.clone().with_created(now));
							}
						}
					}
				}
			}
		}

		let mut responses = Vec::with_capacity(2);

		if legacy {
			if !unicast.answers.is_empty() {
				unicast.id = query.id;
				unicast.questions = query.questions.clone();
				unicast.answers = unicast.answers.into_iter().map(legacy_record).collect();
				unicast.additionals = unicast.additionals.into_iter().map(legacy_record).collect();
				responses.push((unicast, Some(from)));
			}
			return responses;
		}

		if !multicast.answers.is_empty() {
			responses.push((multicast, None));
		}
		if !unicast.answers.is_empty() {
			responses.push((unicast, Some(from)));
		}
		responses
	}
}

/// Records of a set in canonical order: class, type, then rdata bytes.
fn tie_break_key<'a>(records: impl IntoIterator<Item = &'a DnsRecord>) -> Vec<(u16, u16, Vec<u8>)> {
	let mut key = records
		.into_iter()
		.map(|record| (record.class().code(), record.record_type().code(), canonical_rdata(record.data())))
		.collect::<Vec<_>>();
	key.sort();
	key
}

fn legacy_record(record: DnsRecord) -> DnsRecord {
	let ttl = record.ttl().min(LEGACY_MAX_TTL);
	record.with_cache_flush(false).with_ttl(ttl)
}

/// TTL 0 copies of the records of `entries[index]`. Host and enumeration records still used by
/// another live registration are left out, as is anything already in `said`.
fn goodbye_message(entries: &[Entry], index: usize, said: &mut HashSet<DnsRecord>) -> Message {
	let entry = &entries[index];
	let shared = |record: &DnsRecord| {
		entries
			.iter()
			.filter(|other| other.id != entry.id && other.is_live())
			.any(|other| other.records.answers().any(|theirs| theirs == record))
	};

	let mut goodbye = Message::response();
	for record in entry.records.answers() {
		if shared(record) || !said.insert(record.clone()) {
			continue;
		}
		goodbye.add_answer(record.clone().with_ttl(0));
	}
	goodbye
}
