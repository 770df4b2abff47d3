use crate::{dns::Name, errors::BadDnsNameError};
use std::{
	num::NonZeroU32,
	sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub fn iface_v6_name_to_index(name: &str) -> Result<NonZeroU32, std::io::Error> {
	use std::ffi::CString;

	#[cfg(windows)]
	use winapi::shared::netioapi::if_nametoindex;

	#[cfg(not(windows))]
	use libc::if_nametoindex;

	let name = CString::new(name).map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid interface name"))?;
	let index = unsafe { if_nametoindex(name.as_ptr()) };
	NonZeroU32::new(index).ok_or_else(std::io::Error::last_os_error)
}

/// Types that can be interpreted as a fully qualified domain name.
///
/// Strings are parsed with [`Name::parse`]; a missing trailing dot is implied.
pub trait IntoDnsName {
	fn into_fqdn(self) -> Result<Name, BadDnsNameError>;
}
impl IntoDnsName for Name {
	#[inline(always)]
	fn into_fqdn(self) -> Result<Name, BadDnsNameError> {
		Ok(self)
	}
}
impl IntoDnsName for &Name {
	#[inline(always)]
	fn into_fqdn(self) -> Result<Name, BadDnsNameError> {
		Ok(self.clone())
	}
}
impl IntoDnsName for &str {
	#[inline(always)]
	fn into_fqdn(self) -> Result<Name, BadDnsNameError> {
		Name::parse(self)
	}
}
impl IntoDnsName for String {
	#[inline(always)]
	fn into_fqdn(self) -> Result<Name, BadDnsNameError> {
		Name::parse(&self)
	}
}
impl IntoDnsName for &String {
	#[inline(always)]
	fn into_fqdn(self) -> Result<Name, BadDnsNameError> {
		Name::parse(self)
	}
}

// Lock helpers that carry on with the inner value if another thread panicked while holding
// the lock. None of the guarded state can be left half-updated by a panic.

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
	lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
	lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
