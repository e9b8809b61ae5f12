//! End-to-end tests over the HTTP surface: policy CRUD with layered
//! authorization, the disclosure flow against a mocked provider, and the
//! proxy allow-list.

mod common;

use common::{
    ADMIN_TOKEN, MOD_ID, MOD_TOKEN, MODERATOR_LEVEL, TestServer, USER_ID, USER_TOKEN,
};
use roomgate_storage::GrantStore;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policy_payload(name: &str) -> Value {
    json!({
        "name": name,
        "topic": "members only",
        "accepted": {
            "pbdf.sidn-pbdf.email.domain": {
                "accepted_values": ["example.com"],
                "profile": false,
            }
        },
        "room_type": "ph.messages.restricted",
        "user_txt": "Show your email domain to enter.",
    })
}

async fn create_room(server: &TestServer, client: &reqwest::Client, name: &str) -> String {
    let created: Value = client
        .post(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&policy_payload(name))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    created["room_id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn requests_without_identity_are_401() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    for (m, url) in [
        (reqwest::Method::GET, format!("{}/secured-rooms", server.base)),
        (reqwest::Method::POST, format!("{}/secured-rooms", server.base)),
        (
            reqwest::Method::GET,
            format!("{}/secured-rooms/expirations", server.base),
        ),
    ] {
        let resp = client
            .request(m, url)
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }

    server.stop().await;
}

#[tokio::test]
async fn plain_users_cannot_touch_policies() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/secured-rooms", server.base))
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .post(format!("{}/secured-rooms", server.base))
        .bearer_auth(USER_TOKEN)
        .json(&policy_payload("nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert!(server.rooms.calls().is_empty(), "no room must be created");

    server.stop().await;
}

#[tokio::test]
async fn admin_crud_round_trip() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let room_id = create_room(&server, &client, "Secret club").await;
    assert!(server
        .rooms
        .calls()
        .iter()
        .any(|c| c.starts_with(&format!("create {room_id}"))));

    let listed: Vec<Value> = client
        .get(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["room_id"], room_id.as_str());

    // Rename and re-topic through update; the backing room follows.
    let mut updated = policy_payload("Renamed club");
    updated["room_id"] = json!(room_id);
    updated["topic"] = json!("the member lounge");
    let resp = client
        .put(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server
        .rooms
        .calls()
        .contains(&format!("rename {room_id} Renamed club")));
    assert!(server
        .rooms
        .calls()
        .contains(&format!("retopic {room_id} the member lounge")));

    let resp = client
        .delete(format!("{}/secured-rooms?room_id={room_id}", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.rooms.calls().contains(&format!("shutdown {room_id}")));

    // Deleting again: the policy is gone.
    let resp = client
        .delete(format!("{}/secured-rooms?room_id={room_id}", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errors"], "no room with that id");

    server.stop().await;
}

#[tokio::test]
async fn update_rejects_policies_whose_backing_room_is_gone() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let room_id = create_room(&server, &client, "stale").await;
    server.rooms.mark_room_missing(&room_id);

    let mut updated = policy_payload("stale, renamed");
    updated["room_id"] = json!(room_id);
    let resp = client
        .put(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errors"], "no room with that id");

    server.stop().await;
}

#[tokio::test]
async fn create_rejects_client_supplied_room_id() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let mut payload = policy_payload("sneaky");
    payload["room_id"] = json!("!mine:hub");
    let resp = client
        .post(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(server.rooms.calls().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn validation_reports_every_violated_field() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({
            "name": 7,
            "accepted": {},
            "room_type": "bogus",
            "user_txt": null,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    let errors = body["errors"].as_array().unwrap();
    assert!(errors.len() >= 4, "errors were: {errors:?}");

    server.stop().await;
}

#[tokio::test]
async fn room_type_is_immutable() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let room_id = create_room(&server, &client, "typed").await;

    let mut updated = policy_payload("typed");
    updated["room_id"] = json!(room_id);
    updated["room_type"] = json!("ph.threading.restricted");
    let resp = client
        .put(format!("{}/secured-rooms", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errors"], "can't update room type after creation");

    server.stop().await;
}

#[tokio::test]
async fn moderators_may_update_their_room_only() {
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();

    let room_id = create_room(&server, &client, "modded").await;
    server.rooms.grant_power_level(MOD_ID, &room_id, MODERATOR_LEVEL);

    let mut updated = policy_payload("modded, renamed");
    updated["room_id"] = json!(room_id);
    let resp = client
        .put(format!("{}/secured-rooms", server.base))
        .bearer_auth(MOD_TOKEN)
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // The same moderator may read that room's policy but not the full list.
    let resp = client
        .get(format!("{}/secured-rooms?room_id={room_id}", server.base))
        .bearer_auth(MOD_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/secured-rooms", server.base))
        .bearer_auth(MOD_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Moderator power does not extend to create or delete.
    let resp = client
        .post(format!("{}/secured-rooms", server.base))
        .bearer_auth(MOD_TOKEN)
        .json(&policy_payload("new"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .delete(format!("{}/secured-rooms?room_id={room_id}", server.base))
        .bearer_auth(MOD_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Moderator power in one room buys nothing elsewhere.
    let other_id = create_room(&server, &client, "other").await;
    let mut foreign = policy_payload("other");
    foreign["room_id"] = json!(other_id);
    let resp = client
        .put(format!("{}/secured-rooms", server.base))
        .bearer_auth(MOD_TOKEN)
        .json(&foreign)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    server.stop().await;
}

#[tokio::test]
async fn disclosure_start_rewrites_the_callback() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionPtr": {
                "u": format!("{}/irma/session/k5QzdEPCDbLk4fjHJaEb", provider.uri()),
                "irmaqr": "disclosing",
            },
            "token": "k5QzdEPCDbLk4fjHJaEb",
        })))
        .mount(&provider)
        .await;

    let server = TestServer::start(&provider.uri()).await;
    let client = reqwest::Client::new();
    let room_id = create_room(&server, &client, "gated").await;

    let resp = client
        .get(format!("{}/yivi/start?room_id={room_id}", server.base))
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["sessionPtr"]["u"],
        "http://public.example/yivi-proxy/k5QzdEPCDbLk4fjHJaEb"
    );

    // Starting a session for an unsecured room is refused outright.
    let resp = client
        .get(format!("{}/yivi/start?room_id=!unknown:hub", server.base))
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    server.stop().await;
}

#[tokio::test]
async fn matching_disclosure_admits_the_caller() {
    let provider = MockServer::start().await;
    let token = "k5QzdEPCDbLk4fjHJaEb";
    Mock::given(method("GET"))
        .and(path(format!("/session/{token}/result")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "proofStatus": "VALID",
            "disclosed": [[{
                "id": "pbdf.sidn-pbdf.email.domain",
                "rawvalue": "Example.COM",
            }]],
        })))
        .mount(&provider)
        .await;

    let server = TestServer::start(&provider.uri()).await;
    let client = reqwest::Client::new();
    let room_id = create_room(&server, &client, "gated").await;

    let resp = client
        .get(format!(
            "{}/yivi/result?session_token={token}&room_id={room_id}",
            server.base
        ))
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["goto"],
        format!("http://client.example#/room/{room_id}")
    );

    assert!(server.store.is_allowed(USER_ID, &room_id).await.unwrap());
    let calls = server.rooms.calls();
    assert!(calls.contains(&format!("join {USER_ID} {room_id}")));
    assert!(calls.iter().any(|c| c.starts_with(&format!("notice {room_id}"))));

    server.stop().await;
}

#[tokio::test]
async fn non_matching_disclosure_is_refused_without_a_grant() {
    let provider = MockServer::start().await;
    let token = "k5QzdEPCDbLk4fjHJaEb";
    Mock::given(method("GET"))
        .and(path(format!("/session/{token}/result")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "proofStatus": "VALID",
            "disclosed": [[{
                "id": "pbdf.sidn-pbdf.email.domain",
                "rawvalue": "other.org",
            }]],
        })))
        .mount(&provider)
        .await;

    let server = TestServer::start(&provider.uri()).await;
    let client = reqwest::Client::new();
    let room_id = create_room(&server, &client, "gated").await;

    let resp = client
        .get(format!(
            "{}/yivi/result?session_token={token}&room_id={room_id}",
            server.base
        ))
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["not_correct"], "unfortunately not allowed in the room");

    assert!(!server.store.is_allowed(USER_ID, &room_id).await.unwrap());
    assert!(!server
        .rooms
        .calls()
        .contains(&format!("join {USER_ID} {room_id}")));

    server.stop().await;
}

#[tokio::test]
async fn unreachable_provider_is_a_502() {
    // Nothing listens on this port.
    let server = TestServer::start("http://localhost:1").await;
    let client = reqwest::Client::new();
    let room_id = create_room(&server, &client, "gated").await;

    let resp = client
        .get(format!("{}/yivi/start?room_id={room_id}", server.base))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);

    server.stop().await;
}

#[tokio::test]
async fn proxy_rejects_bad_tokens_and_subpaths_before_any_upstream_call() {
    let provider = MockServer::start().await;
    // Any request reaching the provider fails the test.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider)
        .await;

    let server = TestServer::start(&provider.uri()).await;
    let client = reqwest::Client::new();

    for url in [
        format!("{}/yivi-proxy/short", server.base),
        format!("{}/yivi-proxy/k5QzdEPCDbLk4fjHJaEb/delete", server.base),
        format!(
            "{}/yivi-proxy/k5QzdEPCDbLk4fjHJaEb/frontend/nope",
            server.base
        ),
    ] {
        let resp = client.get(url).send().await.unwrap();
        assert_eq!(resp.status(), 403);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Path not allowed");
    }

    server.stop().await;
}

#[tokio::test]
async fn proxy_forwards_allow_listed_subpaths() {
    let provider = MockServer::start().await;
    let token = "k5QzdEPCDbLk4fjHJaEb";
    Mock::given(method("GET"))
        .and(path(format!("/session/{token}/frontend/status")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "CONNECTED"})))
        .mount(&provider)
        .await;

    let server = TestServer::start(&provider.uri()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/yivi-proxy/{token}/frontend/status",
            server.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "CONNECTED");

    server.stop().await;
}

/// Raw SSE endpoint that keeps emitting events after the terminal one and
/// never closes the connection on its own.
async fn spawn_chatty_sse_upstream() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;

                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n")
                    .await;
                let _ = socket.write_all(b"data: \"CONNECTED\"\n\n").await;
                let _ = socket.flush().await;
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                let _ = socket.write_all(b"data: \"DONE\"\n\n").await;
                let _ = socket.flush().await;
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    if socket.write_all(b"data: \"KEEPALIVE\"\n\n").await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn status_stream_force_closes_at_the_terminal_event() {
    let upstream = spawn_chatty_sse_upstream().await;
    let server = TestServer::start(&upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/yivi-proxy/k5QzdEPCDbLk4fjHJaEb/frontend/statusevents",
            server.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // The upstream never hangs up, so only the terminal-status force-close
    // can end this body.
    let body = tokio::time::timeout(std::time::Duration::from_secs(5), resp.bytes())
        .await
        .expect("stream must close itself after the terminal event")
        .unwrap();

    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("\"CONNECTED\""));
    assert!(text.contains("\"DONE\""));
    assert!(!text.contains("KEEPALIVE"));

    server.stop().await;
}
