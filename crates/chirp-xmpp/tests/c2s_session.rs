//! End-to-end tests for client sessions: negotiation, routing, presence and
//! connection teardown, driven over real sockets and in-memory pipes.

mod common;

use std::time::Duration;

use common::{has_attr, init_tracing, test_config, TestServer, DEFAULT_TIMEOUT};
use chirp_xmpp::XmppServerConfig;

#[tokio::test]
async fn test_server_stream_header() {
    init_tracing();

    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_stream_header().await.unwrap();
    let response = client.expect_features().await.unwrap();

    assert!(response.contains("<stream:stream"));
    assert!(has_attr(&response, "from", "localhost"));
    assert!(has_attr(&response, "version", "1.0"));
    assert!(has_attr(&response, "xmlns:stream", "http://etherx.jabber.org/streams"));
    assert!(response.contains("id='"));
    assert!(response.contains("<mechanism>PLAIN</mechanism>"));
}

#[tokio::test]
async fn test_negotiation_registers_bound_identity_once() {
    init_tracing();

    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let bind = client.login_and_bind("alice", Some("phone")).await.unwrap();
    assert!(bind.contains("<jid>alice@localhost/phone</jid>"));
    assert!(has_attr(&bind, "id", "bind_1"));

    client
        .send("<iq type='set' id='sess_1'><session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></iq>")
        .await
        .unwrap();
    let session = client.read_until("sess_1", DEFAULT_TIMEOUT).await.unwrap();
    assert!(has_attr(&session, "type", "result"));

    server.wait_registered("alice@localhost/phone").await;
    let count = server
        .registry
        .snapshot()
        .iter()
        .filter(|s| s.jid() == "alice@localhost/phone")
        .count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_authcid_with_domain_is_normalised() {
    init_tracing();

    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let bind = client
        .login_and_bind("alice@localhost", Some("laptop"))
        .await
        .unwrap();
    assert!(bind.contains("<jid>alice@localhost/laptop</jid>"));
}

#[tokio::test]
async fn test_bind_is_idempotent_after_activation() {
    init_tracing();

    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.negotiate("alice", Some("phone")).await.unwrap();

    client.send_bind("bind_2", Some("tablet")).await.unwrap();
    let response = client.read_until("</iq>", DEFAULT_TIMEOUT).await.unwrap();

    assert!(has_attr(&response, "id", "bind_2"));
    assert!(response.contains("<jid>alice@localhost/phone</jid>"));
    assert_eq!(server.registry.len(), 1);
    assert!(server.registry.is_registered("alice@localhost/phone"));
}

#[tokio::test]
async fn test_message_routing_restamps_sender() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();
    bob.negotiate("bob", None).await.unwrap();
    server.wait_registered("bob@localhost").await;

    alice
        .send("<message to='bob@localhost' from='mallory@localhost' type='chat' id='m1' xml:lang='en'><body>hi bob</body></message>")
        .await
        .unwrap();

    let received = bob.read_until("</message>", DEFAULT_TIMEOUT).await.unwrap();
    let message = &received[received.find("<message").unwrap()..];
    assert!(has_attr(message, "from", "alice@localhost"));
    assert!(has_attr(message, "to", "bob@localhost"));
    assert!(has_attr(message, "id", "m1"));
    assert!(has_attr(message, "xml:lang", "en"));
    assert!(message.contains("<body>hi bob</body>"));
    assert!(!message.contains("mallory"));

    // Exactly one copy
    let pong = bob.ping("after_m1").await.unwrap();
    assert!(!pong.contains("<message"));
}

#[tokio::test]
async fn test_message_to_bare_identity_reaches_bound_resource() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    alice.negotiate("alice", Some("phone")).await.unwrap();
    bob.negotiate("bob", Some("desk")).await.unwrap();
    server.wait_registered("bob@localhost/desk").await;

    alice
        .send("<message to='bob@localhost' type='chat'><body>bare</body></message>")
        .await
        .unwrap();

    let received = bob.read_until("</message>", DEFAULT_TIMEOUT).await.unwrap();
    assert!(has_attr(&received, "from", "alice@localhost/phone"));
    assert!(received.contains("<body>bare</body>"));
}

#[tokio::test]
async fn test_route_miss_is_silent() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();

    alice
        .send("<message to='nobody@localhost' type='chat'><body>anyone?</body></message>")
        .await
        .unwrap();

    let pong = alice.ping("ping_1").await.unwrap();
    assert!(!pong.contains("<error"));
    assert!(!pong.contains("<message"));
    assert!(server.registry.is_registered("alice@localhost"));
}

#[tokio::test]
async fn test_implicit_session_when_request_skipped() {
    init_tracing();

    let server = TestServer::start().await;
    let mut bob = server.connect().await;
    bob.negotiate("bob", None).await.unwrap();

    let mut alice = server.connect().await;
    alice.login_and_bind("alice", Some("phone")).await.unwrap();
    alice
        .send("<message to='bob@localhost' type='chat'><body>straight in</body></message>")
        .await
        .unwrap();

    let received = bob.read_until("</message>", DEFAULT_TIMEOUT).await.unwrap();
    assert!(received.contains("straight in"));
    assert!(server.registry.is_registered("alice@localhost/phone"));
}

#[tokio::test]
async fn test_presence_broadcast_to_other_sessions() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();
    server.wait_registered("alice@localhost").await;
    bob.negotiate("bob", None).await.unwrap();

    // Alice hears about bob coming online with the default presence.
    let initial = alice.read_until("</presence>", DEFAULT_TIMEOUT).await.unwrap();
    assert!(has_attr(&initial, "from", "bob@localhost"));
    assert!(initial.contains("chat"));

    bob.send("<presence><show>away</show><status>lunch</status></presence>")
        .await
        .unwrap();
    let update = alice.read_until("lunch", DEFAULT_TIMEOUT).await.unwrap();
    assert!(update.contains("away"));

    // Bob does not receive his own broadcast.
    let pong = bob.ping("ping_self").await.unwrap();
    assert!(!pong.contains("lunch"));
}

#[tokio::test]
async fn test_roster_lists_online_users() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();
    bob.negotiate("bob", Some("desk")).await.unwrap();
    server.wait_registered("bob@localhost/desk").await;

    alice
        .send("<iq type='get' id='roster_1'><query xmlns='jabber:iq:roster'/></iq>")
        .await
        .unwrap();
    let response = alice.read_until("</iq>", DEFAULT_TIMEOUT).await.unwrap();
    let roster = &response[response.find("roster_1").unwrap()..];

    assert!(has_attr(roster, "jid", "bob@localhost"));
    assert!(!has_attr(roster, "jid", "alice@localhost"));
}

#[tokio::test]
async fn test_blocked_peer_does_not_stall_others() {
    init_tracing();

    let server = TestServer::start_with_config(XmppServerConfig {
        outbound_queue_size: 64,
        ..test_config()
    })
    .await;

    // Bob gets a tiny pipe and queue, and stops reading once active.
    let mut bob = server.connect_in_memory(
        XmppServerConfig {
            outbound_queue_size: 2,
            ..server.config.clone()
        },
        512,
    );
    bob.negotiate("bob", None).await.unwrap();
    server.wait_registered("bob@localhost").await;

    let mut carol = server.connect().await;
    carol.negotiate("carol", Some("desk")).await.unwrap();
    let mut alice = server.connect().await;
    alice.negotiate("alice", Some("phone")).await.unwrap();
    server.wait_registered("alice@localhost/phone").await;

    for i in 0..20 {
        alice
            .send(&format!("<presence><status>update {}</status></presence>", i))
            .await
            .unwrap();
    }
    alice.ping("after_updates").await.unwrap();

    let presence = carol.read_until("update 19", DEFAULT_TIMEOUT).await.unwrap();
    assert!(has_attr(&presence, "from", "alice@localhost/phone"));

    alice
        .send("<message to='carol@localhost/desk' type='chat'><body>still here</body></message>")
        .await
        .unwrap();
    let message = carol.read_until("</message>", DEFAULT_TIMEOUT).await.unwrap();
    assert!(message.contains("still here"));

    // The registry stays usable and bob stays registered.
    assert_eq!(server.registry.len(), 3);
    assert!(server.registry.is_registered("bob@localhost"));
    drop(bob);
}

#[tokio::test]
async fn test_disconnect_broadcasts_unavailable() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();
    server.wait_registered("alice@localhost").await;
    bob.negotiate("bob", Some("desk")).await.unwrap();
    server.wait_registered("bob@localhost/desk").await;

    drop(bob);
    server.wait_unregistered("bob@localhost/desk").await;

    let update = alice.read_until("unavailable", DEFAULT_TIMEOUT).await.unwrap();
    let presence = &update[update.rfind("<presence").unwrap()..];
    assert!(has_attr(presence, "from", "bob@localhost/desk"));
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_stream_close_ends_session() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();
    server.wait_registered("alice@localhost").await;

    alice.send("</stream:stream>").await.unwrap();
    let rest = alice.read_to_end().await.unwrap();

    assert!(rest.ends_with("</stream:stream>"));
    server.wait_unregistered("alice@localhost").await;
}

#[tokio::test]
async fn test_malformed_auth_closes_connection() {
    init_tracing();

    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_stream_header().await.unwrap();
    client.expect_features().await.unwrap();
    client
        .send(
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>bm90LXBsYWlu</auth>\
             <iq type='get' id='after_auth' to='localhost'><ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .await
        .unwrap();

    let rest = client.read_to_end().await.unwrap();
    assert!(!rest.contains("<success"));
    assert!(!rest.contains("<failure"));
    assert!(!rest.contains("after_auth"));
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_unparseable_auth_markup_closes_connection() {
    init_tracing();

    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_stream_header().await.unwrap();
    client.expect_features().await.unwrap();
    client
        .send(
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>&bogus;</auth>\
             <iq type='set' id='bind_1'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></iq>",
        )
        .await
        .unwrap();

    let rest = client.read_to_end().await.unwrap();
    assert!(!rest.contains("<success"));
    assert!(!rest.contains("<failure"));
    assert!(!rest.contains("bind_1"));
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_mismatched_closing_tag_does_not_stall_session() {
    init_tracing();

    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();

    alice
        .send("<message to='x@localhost'><body>oops</message>")
        .await
        .unwrap();

    let pong = alice.ping("after_oops").await.unwrap();
    assert!(!pong.contains("<error"));
    assert!(server.registry.is_registered("alice@localhost"));
}

#[tokio::test]
async fn test_oversized_stanza_is_policy_violation() {
    init_tracing();

    let server = TestServer::start_with_config(XmppServerConfig {
        max_stanza_size: 512,
        ..test_config()
    })
    .await;
    let mut alice = server.connect().await;
    alice.negotiate("alice", None).await.unwrap();
    server.wait_registered("alice@localhost").await;

    let body = "x".repeat(2048);
    alice
        .send(&format!("<message to='bob@localhost'><body>{}</body></message>", body))
        .await
        .unwrap();

    let rest = alice.read_to_end().await.unwrap();
    assert!(rest.contains("<policy-violation"));
    assert!(rest.ends_with("</stream:stream>"));
    server.wait_unregistered("alice@localhost").await;
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    init_tracing();

    let server = TestServer::start_with_config(XmppServerConfig {
        idle_timeout: Some(Duration::from_millis(200)),
        ..test_config()
    })
    .await;
    let mut client = server.connect().await;

    client.send_stream_header().await.unwrap();
    client.expect_features().await.unwrap();

    let rest = client.read_to_end().await.unwrap();
    assert!(rest.contains("<connection-timeout"));
}
