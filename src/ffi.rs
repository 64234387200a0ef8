//! C ABI embedding surface. Handles are opaque boxed pointers; strings are
//! NUL-terminated UTF-8. This replaces the teacher's PyO3 binding surface,
//! which targeted a different host language than this design's embedding
//! surface (see DESIGN.md).

use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Once;

use crate::client::Client;
use crate::playable::{AvconvSource, Playable};

static LOGGING: Once = Once::new();

/// Installs a global `tracing_subscriber::fmt` subscriber. Idempotent:
/// later calls are a no-op. `enable = false` leaves logging uninstalled.
#[no_mangle]
pub extern "C" fn setup_logging(enable: bool, debug: bool) {
    if !enable {
        return;
    }
    LOGGING.call_once(|| {
        let filter = if debug { "debug" } else { "info" };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .try_init();
    });
}

unsafe fn str_from_raw(ptr: *const c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// # Safety
/// `user_id`, `guild_id`, `session_id` must be valid NUL-terminated UTF-8
/// C strings for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn create_client(
    user_id: *const c_char,
    guild_id: *const c_char,
    session_id: *const c_char,
) -> *mut Client {
    let client = Client::new(
        str_from_raw(user_id),
        str_from_raw(guild_id),
        str_from_raw(session_id),
    );
    client.run();
    Box::into_raw(Box::new(client))
}

/// # Safety
/// `handle` must be a pointer returned by `create_client`, not previously
/// destroyed.
#[no_mangle]
pub unsafe extern "C" fn client_destroy(handle: *mut Client) {
    if handle.is_null() {
        return;
    }
    let client = Box::from_raw(handle);
    client.disconnect();
}

/// # Safety
/// `handle` must be a live pointer from `create_client`; `endpoint` and
/// `token` must be valid NUL-terminated UTF-8 C strings.
#[no_mangle]
pub unsafe extern "C" fn client_update_server_info(
    handle: *mut Client,
    endpoint: *const c_char,
    token: *const c_char,
) -> bool {
    if handle.is_null() {
        return false;
    }
    let client = &*handle;
    client
        .update_server_info(str_from_raw(endpoint), str_from_raw(token))
        .is_ok()
}

/// # Safety
/// `handle` must be a live pointer from `create_client`; `playable_handle`
/// must be a live pointer from `create_avconv_playable`, not previously
/// passed to `client_play` or `playable_destroy`.
#[no_mangle]
pub unsafe extern "C" fn client_play(handle: *mut Client, playable_handle: *mut Box<dyn Playable>) -> bool {
    if handle.is_null() || playable_handle.is_null() {
        return false;
    }
    let client = &*handle;
    let playable = *Box::from_raw(playable_handle);
    client.play(playable).is_ok()
}

/// # Safety
/// `path` must be a valid NUL-terminated UTF-8 C string naming a file
/// readable by the spawned decoder subprocess.
#[no_mangle]
pub unsafe extern "C" fn create_avconv_playable(path: *const c_char) -> *mut Box<dyn Playable> {
    let path = str_from_raw(path);
    let source: Box<dyn Playable> = Box::new(AvconvSource::new(&path));
    Box::into_raw(Box::new(source))
}

/// # Safety
/// `handle` must be a pointer returned by `create_avconv_playable`, not
/// previously destroyed or handed to `client_play`.
#[no_mangle]
pub unsafe extern "C" fn playable_destroy(handle: *mut Box<dyn Playable>) {
    if handle.is_null() {
        return;
    }
    let playable = Box::from_raw(handle);
    playable.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn create_and_destroy_client_round_trips() {
        let user_id = CString::new("42").unwrap();
        let guild_id = CString::new("7").unwrap();
        let session_id = CString::new("abc").unwrap();
        unsafe {
            let handle = create_client(user_id.as_ptr(), guild_id.as_ptr(), session_id.as_ptr());
            assert!(!handle.is_null());
            client_destroy(handle);
        }
    }
}
