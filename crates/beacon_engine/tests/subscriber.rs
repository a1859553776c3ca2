use std::sync::Once;

use beacon_core::ConnectionStatus;
use beacon_engine::{
    ConnectionEvent, ConnectionEventKind, LoopbackTransport, NotificationSubscriber,
    SubscriberSettings, Transport,
};
use serde_json::json;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(beacon_logging::initialize_for_tests);
}

const USER: &str = "42";
const CHANNEL: &str = "App.Models.User.42";
const EVENT: &str = "notification.created";

fn mounted(transport: &LoopbackTransport) -> NotificationSubscriber {
    NotificationSubscriber::mount(transport, USER, &SubscriberSettings::default()).expect("mount")
}

#[test]
fn mount_subscribes_and_registers_one_handler_of_each_kind() {
    init_logging();
    let transport = LoopbackTransport::new();
    let subscriber = mounted(&transport);

    assert!(subscriber.is_mounted());
    assert_eq!(subscriber.channel(), CHANNEL);
    assert_eq!(transport.subscription_count(), 1);
    assert_eq!(transport.event_handler_count(CHANNEL, EVENT), 1);
    for kind in [
        ConnectionEventKind::Connected,
        ConnectionEventKind::Error,
        ConnectionEventKind::Disconnected,
    ] {
        assert_eq!(transport.connection_handler_count(kind), 1);
    }
    assert_eq!(subscriber.status(), ConnectionStatus::Disconnected);
    assert!(subscriber.notifications().is_empty());
}

#[test]
fn events_are_listed_newest_first() {
    init_logging();
    let transport = LoopbackTransport::new();
    let subscriber = mounted(&transport);

    for n in 0..5 {
        let delivered = transport.publish(CHANNEL, EVENT, json!({ "message": format!("note {n}") }));
        assert_eq!(delivered, 1);
    }

    let notifications = subscriber.notifications();
    assert_eq!(notifications.len(), 5);
    let messages: Vec<_> = notifications.iter().map(|n| n.message.as_str()).collect();
    assert_eq!(messages, vec!["note 4", "note 3", "note 2", "note 1", "note 0"]);

    let mut ids: Vec<_> = notifications.iter().map(|n| n.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert!(notifications
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp));
}

#[test]
fn other_events_and_channels_are_ignored() {
    init_logging();
    let transport = LoopbackTransport::new();
    let subscriber = mounted(&transport);

    transport.publish(CHANNEL, "something.else", json!({ "message": "nope" }));
    transport.publish("App.Models.User.7", EVENT, json!({ "message": "not mine" }));

    assert!(subscriber.notifications().is_empty());
}

#[test]
fn connection_events_drive_status() {
    init_logging();
    let transport = LoopbackTransport::new();
    let subscriber = mounted(&transport);

    transport.emit(ConnectionEvent::Connected);
    assert_eq!(subscriber.status(), ConnectionStatus::Connected);

    transport.emit(ConnectionEvent::Error("handshake failed".to_string()));
    assert_eq!(subscriber.status(), ConnectionStatus::Disconnected);
    assert!(subscriber.notifications().is_empty());

    transport.emit(ConnectionEvent::Connected);
    transport.emit(ConnectionEvent::Disconnected);
    assert_eq!(subscriber.status(), ConnectionStatus::Disconnected);
}

#[test]
fn view_reflects_feed() {
    init_logging();
    let transport = LoopbackTransport::new();
    let subscriber = mounted(&transport);
    let mut watcher = subscriber.watch();

    transport.emit(ConnectionEvent::Connected);
    transport.publish(CHANNEL, EVENT, json!("plain text payload"));

    assert!(watcher.has_changed().unwrap());
    let view = watcher.borrow_and_update().clone();
    assert_eq!(view, subscriber.view());
    assert_eq!(view.status_label, "Connected");
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].message, "plain text payload");
}

#[test]
fn unmount_detaches_everything_exactly_once() {
    init_logging();
    let transport = LoopbackTransport::new();
    let mut subscriber = mounted(&transport);
    transport.publish(CHANNEL, EVENT, json!({ "message": "before" }));

    subscriber.unmount();
    subscriber.unmount();

    assert!(!subscriber.is_mounted());
    assert_eq!(transport.subscription_count(), 0);
    assert_eq!(transport.unsubscribe_count(), 1);
    for kind in [
        ConnectionEventKind::Connected,
        ConnectionEventKind::Error,
        ConnectionEventKind::Disconnected,
    ] {
        assert_eq!(transport.connection_handler_count(kind), 0);
    }

    assert_eq!(transport.publish(CHANNEL, EVENT, json!({ "message": "after" })), 0);
    transport.emit(ConnectionEvent::Connected);
    assert!(subscriber.notifications().is_empty());
    assert_eq!(subscriber.status(), ConnectionStatus::Disconnected);

    drop(subscriber);
    assert_eq!(transport.unsubscribe_count(), 1);
}

#[test]
fn dropping_subscriber_unmounts() {
    init_logging();
    let transport = LoopbackTransport::new();
    let subscriber = mounted(&transport);
    drop(subscriber);

    assert_eq!(transport.subscription_count(), 0);
    assert_eq!(transport.unsubscribe_count(), 1);
    assert_eq!(
        transport.connection_handler_count(ConnectionEventKind::Connected),
        0
    );
}

#[test]
fn two_subscribers_keep_separate_feeds() {
    init_logging();
    let transport = LoopbackTransport::new();
    let first = mounted(&transport);
    let second = NotificationSubscriber::mount(&transport, "7", &SubscriberSettings::default())
        .expect("mount");

    transport.publish(CHANNEL, EVENT, json!({ "message": "for 42" }));
    transport.publish("App.Models.User.7", EVENT, json!({ "message": "for 7" }));
    transport.emit(ConnectionEvent::Connected);

    assert_eq!(first.notifications()[0].message, "for 42");
    assert_eq!(second.notifications()[0].message, "for 7");
    assert_eq!(second.status(), ConnectionStatus::Connected);
    assert_eq!(transport.subscription_count(), 2);
}

#[test]
fn custom_settings_choose_channel_and_event() {
    init_logging();
    let transport = LoopbackTransport::new();
    let settings = SubscriberSettings {
        channel_prefix: "inbox.".to_string(),
        event_name: "NewMessage".to_string(),
    };
    let subscriber = NotificationSubscriber::mount(&transport, "abc", &settings).unwrap();

    transport.publish("inbox.abc", "NewMessage", json!({ "message": "hello" }));
    assert_eq!(subscriber.notifications()[0].message, "hello");

    let sub = transport.subscribe_private("inbox.abc").unwrap();
    assert_eq!(sub.channel(), "private-inbox.abc");
}
