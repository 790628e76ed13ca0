//! Registration of the `sqlite-vec` extension.
//!
//! The only unsafe code in the crate lives here.

use std::sync::Once;

use rusqlite::ffi::{sqlite3, sqlite3_api_routines, sqlite3_auto_extension};
use sqlite_vec::sqlite3_vec_init;

type SqliteExtensionFn =
    unsafe extern "C" fn(*mut sqlite3, *mut *mut i8, *const sqlite3_api_routines) -> i32;

static REGISTER: Once = Once::new();

/// Register `sqlite-vec` as an auto-loaded extension for every new connection.
///
/// Must run before the graph store opens its connection. Repeated calls are no-ops.
#[allow(unsafe_code)]
pub fn init_sqlite_vec_extension() {
    REGISTER.call_once(|| {
        // SAFETY: sqlite3_vec_init has the extension entry-point signature expected by
        // sqlite3_auto_extension; the transmute only erases the pointer type.
        unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute::<*const (), SqliteExtensionFn>(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connections_see_vec0() {
        init_sqlite_vec_extension();
        init_sqlite_vec_extension();
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .unwrap();
        assert!(version.starts_with('v'));
    }
}
