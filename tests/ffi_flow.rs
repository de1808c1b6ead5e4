//! C FFI round trip against a mock backend
//!
//! The bridge keeps process-wide state, so the whole flow lives in one test.

use media_core::ffi_bridge::*;
use serde_json::{json, Value};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn take(ptr: *mut c_char) -> Value {
    assert!(!ptr.is_null());
    let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
    media_free_string(ptr);
    serde_json::from_str(&text).unwrap()
}

fn ok(ptr: *mut c_char) -> Value {
    let response = take(ptr);
    assert_eq!(response["success"], true, "response: {}", response);
    response["data"].clone()
}

fn arg(value: Value) -> CString {
    CString::new(value.to_string()).unwrap()
}

#[test]
fn test_ffi_resolve_prepare_and_play() {
    // The mock server runs on its own runtime; the bridge uses its internal one
    let server_runtime = tokio::runtime::Runtime::new().unwrap();
    let server = server_runtime.block_on(async {
        let server = MockServer::start().await;
        let media_url = format!("{}/media/x.mp4", server.uri());
        Mock::given(method("GET"))
            .and(path("/api/stream"))
            .and(query_param("title", "Tenet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "progress_url": "/p/tenet" })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/tenet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "progress": { "status": "transcoding", "progress": 10.0, "downloaded": 1, "total": 10 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": media_url })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/x.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/metadata/Inception"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ratings": [] })))
            .mount(&server)
            .await;
        server
    });

    // calls before init fail cleanly
    let response = take(media_player_snapshot());
    assert_eq!(response["success"], false);

    let config = arg(json!({ "client": { "base_url": server.uri() } }));
    ok(media_init(config.as_ptr()));

    let key = arg(json!({ "kind": "movie", "title": "Inception" }));
    let resolved = ok(media_resolve_title(key.as_ptr()));
    let url = resolved["url"].as_str().unwrap().to_string();
    assert!(url.ends_with("/media/x.mp4"));

    let blank = arg(json!({ "kind": "movie", "title": "  " }));
    assert_eq!(take(media_resolve_title(blank.as_ptr()))["success"], false);

    // a cancelled resolve is reported as aborted, not as an error
    let pending = std::thread::spawn(|| {
        let key = arg(json!({ "kind": "movie", "title": "Tenet" }));
        take(media_resolve_title(key.as_ptr()))
    });
    while !pending.is_finished() {
        std::thread::sleep(Duration::from_millis(100));
        ok(media_cancel_resolve());
    }
    let cancelled = pending.join().unwrap();
    assert_eq!(cancelled["success"], false);
    assert_eq!(cancelled["aborted"], true);
    assert!(cancelled.get("error").is_none());

    let url_arg = CString::new(url).unwrap();
    let descriptor = ok(media_prepare_source(url_arg.as_ptr()));
    assert_eq!(descriptor["kind"], "buffered");
    assert_eq!(descriptor["bytes"], 64);

    let request = arg(json!({ "key": { "kind": "movie", "title": "Inception" } }));
    let snapshot = ok(media_open_player(request.as_ptr()));
    assert_eq!(snapshot["state"], "loading");

    let commands = ok(media_drain_surface_commands());
    assert_eq!(commands[0]["type"], "load");
    assert_eq!(commands[0]["source"]["kind"], "buffered");

    let event = arg(json!({ "type": "loaded_metadata", "duration": 120.0 }));
    assert_eq!(ok(media_surface_event(event.as_ptr()))["state"], "ready");

    let play = arg(json!({ "command": "toggle_play" }));
    assert_eq!(ok(media_player_command(play.as_ptr()))["state"], "playing");

    let mute = arg(json!({ "command": "toggle_mute" }));
    assert_eq!(ok(media_player_command(mute.as_ptr()))["volume"], 0.0);

    let decode_error = arg(json!({ "type": "error", "message": "MEDIA_ERR_DECODE" }));
    let response = take(media_surface_event(decode_error.as_ptr()));
    assert_eq!(response["success"], false);
    assert!(response["error"].as_str().unwrap().contains("MEDIA_ERR_DECODE"));

    ok(media_close_player());
    let commands = ok(media_drain_surface_commands());
    assert!(commands.as_array().unwrap().iter().any(|c| c["type"] == "unload"));
    assert_eq!(take(media_player_snapshot())["success"], false);
}
