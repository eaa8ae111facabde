mod common;

use std::time::Duration;

use common::{next_event, FakeServer};
use omxremote::{
    config::Config,
    error::ErrorKind,
    events::Event,
    protocol::{session::LinkState, FileListing, Flags, Header, Reassembler, SettingType},
    remote::Client,
};

async fn connected() -> (FakeServer, Client, tokio::sync::broadcast::Receiver<Event>) {
    let mut server = FakeServer::bind().await;
    let mut client = Client::new(server.config()).unwrap();
    let mut events = client.subscribe();

    client.connect().await.unwrap();
    server.accept_login("abc-123", 1500).await;
    assert_eq!(next_event(&mut events).await, Event::Connected);

    (server, client, events)
}

#[tokio::test]
async fn logs_in_and_lists_files() {
    let (mut server, client, _events) = connected().await;
    assert!(client.is_connected());
    assert_eq!(client.link_state(), LinkState::Connected);

    let (listing, ()) = tokio::join!(client.list_files(Some(".")), async {
        let request = server.recv().await;
        assert_eq!(request.header, Header::ListFiles);
        assert_eq!(request.flags, Flags::NONE);
        assert_eq!(request.text(), "abc-123.");
        server.send(Header::ListFiles, "/root||a.mkv|sub/").await;
    });

    assert_eq!(
        listing.unwrap(),
        Some(FileListing {
            path: String::from("/root"),
            entries: vec![String::from("a.mkv"), String::from("sub/")],
        })
    );
}

#[tokio::test]
async fn lists_settings() {
    let (mut server, client, _events) = connected().await;

    let (settings, ()) = tokio::join!(client.list_settings(), async {
        let request = server.recv().await;
        assert_eq!(request.header, Header::ListSettings);
        assert_eq!(request.text(), "abc-123");
        server
            .send(
                Header::ListSettings,
                "subtitles;on;Show subtitles;;SWITCH;volume;-300;Initial volume;;NUMBER",
            )
            .await;
    });

    let settings = settings.unwrap().unwrap();
    assert_eq!(settings.len(), 2);
    assert_eq!(settings[0].kind, SettingType::Switch);
    assert_eq!(settings[1].key, "volume");
}

#[tokio::test]
async fn invalid_session_triggers_one_relogin() {
    let (mut server, client, mut events) = connected().await;

    server.send(Header::ErrorInvalidSession, "").await;
    assert_eq!(next_event(&mut events).await, Event::Disconnected);
    assert_eq!(client.link_state(), LinkState::LoggingIn);

    server.accept_login("def-456", 1500).await;
    assert_eq!(next_event(&mut events).await, Event::Connected);
    server.assert_silent(Duration::from_millis(300)).await;

    client.pause().unwrap();
    let pause = server.recv().await;
    assert_eq!(pause.header, Header::Pause);
    assert_eq!(pause.text(), "def-456");
}

#[tokio::test]
async fn commands_go_out_in_order() {
    let (mut server, client, _events) = connected().await;

    client.pause().unwrap();
    client.set_volume(-300).unwrap();
    client.seek(Duration::from_secs(90)).unwrap();
    client.set_setting("subtitles", "off").unwrap();
    client.toggle_subtitles().unwrap();

    let expected = [
        (Header::Pause, "abc-123"),
        (Header::SetVolume, "abc-123-300"),
        (Header::SeekTo, "abc-12390000"),
        (Header::SetSetting, "abc-123subtitles=off"),
        (Header::SubtitleToggle, "abc-123"),
    ];
    for (header, text) in expected {
        let frame = server.recv().await;
        assert_eq!((frame.header, frame.text().as_str()), (header, text));
    }
}

#[tokio::test]
async fn multipart_commands_do_not_interleave() {
    let mut server = FakeServer::bind().await;
    let mut client = Client::new(server.config()).unwrap();
    client.connect().await.unwrap();
    server.accept_login("abc", 10).await;

    client
        .start_playback("/media/a-long-video-name.mkv", Some("/media/a.srt"))
        .unwrap();
    client.set_setting("subtitles", "on").unwrap();

    let mut reassembler = Reassembler::new();
    let mut messages = Vec::new();
    let mut in_progress = None;
    while messages.len() < 2 {
        let frame = server.recv().await;
        assert!(frame.payload.len() <= 8);

        // Every fragment continues the message in progress, if any.
        if let Some(header) = in_progress {
            assert_eq!(frame.header, header);
        }
        in_progress = (!frame.is_final()).then_some(frame.header);

        if let Some(packet) = reassembler.push(frame) {
            messages.push(packet);
        }
    }

    assert_eq!(messages[0].header, Header::StartVideo);
    assert_eq!(
        messages[0].data,
        "abc/media/a-long-video-name.mkv|/media/a.srt"
    );
    assert_eq!(messages[1].header, Header::SetSetting);
    assert_eq!(messages[1].data, "abcsubtitles=on");
}

#[tokio::test]
async fn timed_out_request_yields_nothing_and_late_reply_is_dropped() {
    let mut server = FakeServer::bind().await;
    let config = Config {
        request_timeout: Duration::from_millis(300),
        ..server.config()
    };
    let mut client = Client::new(config).unwrap();
    client.connect().await.unwrap();
    server.accept_login("abc-123", 1500).await;

    let (listing, ()) = tokio::join!(client.list_files(Some("/old")), async {
        assert_eq!(server.recv().await.text(), "abc-123/old");
    });
    assert_eq!(listing.unwrap(), None);

    // Answer the abandoned request after the fact.
    server.send(Header::ListFiles, "/old||stale.mkv").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (listing, ()) = tokio::join!(client.list_files(Some("/new")), async {
        assert_eq!(server.recv().await.text(), "abc-123/new");
        server.send(Header::ListFiles, "/new||fresh.mkv").await;
    });
    let listing = listing.unwrap().unwrap();
    assert_eq!(listing.path, "/new");
    assert_eq!(listing.entries, ["fresh.mkv"]);
}

#[tokio::test]
async fn pushes_drive_the_player_state() {
    let (server, client, mut events) = connected().await;
    assert!(client.current_player_state().is_none());

    server
        .send(Header::PlayerParams, "d60000v-300|movie.mkv")
        .await;
    assert_eq!(next_event(&mut events).await, Event::PlayerInitialized);
    assert!(client.is_playback_active());
    let state = client.current_player_state().unwrap();
    assert_eq!(state.title(), "movie.mkv");
    assert_eq!(state.volume(), -300);

    server.send(Header::PlayerState, "p1000v-300P").await;
    server.send(Header::PlayerState, "p2000v-300P").await;
    assert_eq!(next_event(&mut events).await, Event::StateChanged);

    server
        .send_fragmented(Header::PlayerInfo, "MOVIE$Some Movie$Y1999", 6)
        .await;
    assert_eq!(next_event(&mut events).await, Event::InfoUpdated);
    let state = client.current_player_state().unwrap();
    assert_eq!(state.title(), "Some Movie");
    assert_eq!(state.info(), "year 1999");
    assert_eq!(state.position(), Duration::from_secs(2));
    assert!(state.is_paused());

    server.send(Header::PlayerInfo, "TRAILER$x$y").await;
    assert_eq!(
        next_event(&mut events).await,
        Event::ParseFailed {
            header: Header::PlayerInfo,
            payload: String::from("TRAILER$x$y"),
        }
    );

    server.send(Header::StopVideo, "").await;
    assert_eq!(next_event(&mut events).await, Event::PlayerExited);
    assert!(client.current_player_state().is_none());
    assert!(!client.is_playback_active());
}

#[tokio::test]
async fn silence_means_disconnected() {
    let mut server = FakeServer::bind().await;
    let config = Config {
        receive_timeout: Duration::from_millis(300),
        ..server.config()
    };
    let mut client = Client::new(config).unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    server.accept_login("abc-123", 1500).await;

    assert_eq!(next_event(&mut events).await, Event::Connected);
    assert_eq!(next_event(&mut events).await, Event::Disconnected);
    assert!(!client.is_connected());

    server.send(Header::Keepalive, "").await;
    assert_eq!(next_event(&mut events).await, Event::Connected);
}

#[tokio::test]
async fn disconnect_logs_off_once() {
    let (mut server, mut client, mut events) = connected().await;

    client.disconnect().await;
    let exit = server.recv().await;
    assert_eq!(exit.header, Header::Exit);
    assert_eq!(exit.text(), "abc-123");
    assert_eq!(next_event(&mut events).await, Event::Disconnected);

    client.disconnect().await;
    server.assert_silent(Duration::from_millis(200)).await;

    assert!(!client.is_connected());
    assert_eq!(client.link_state(), LinkState::Shutdown);
    assert_eq!(
        client.pause().unwrap_err().kind,
        ErrorKind::FailedPrecondition
    );
}

#[tokio::test]
async fn reconnecting_replaces_the_running_engine() {
    let (mut server, mut client, _events) = connected().await;

    client.connect().await.unwrap();
    assert_eq!(server.recv().await.header, Header::Exit);
    server.accept_login("fff-1", 1500).await;

    client.stop_playback().unwrap();
    let stop = server.recv().await;
    assert_eq!(stop.header, Header::StopVideo);
    assert_eq!(stop.text(), "fff-1");
}

#[tokio::test]
async fn malformed_login_reply_is_reported() {
    let mut server = FakeServer::bind().await;
    let mut client = Client::new(server.config()).unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    assert_eq!(server.recv().await.header, Header::Login);
    server.send(Header::Login, "not a login reply").await;

    assert_eq!(next_event(&mut events).await, Event::Connected);
    assert_eq!(
        next_event(&mut events).await,
        Event::ParseFailed {
            header: Header::Login,
            payload: String::from("not a login reply"),
        }
    );
    assert_eq!(client.link_state(), LinkState::LoggingIn);
}

#[tokio::test]
async fn own_group_traffic_is_not_taken_for_a_server() {
    let port = std::net::UdpSocket::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = Config {
        port,
        keepalive_connected: Duration::from_millis(100),
        keepalive_disconnected: Duration::from_millis(100),
        request_timeout: Duration::from_millis(500),
        ..Config::default()
    };
    assert!(config.group.is_multicast());

    let mut client = Client::new(config).unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    // Nobody serves the group, so the request must go unanswered.
    assert_eq!(client.list_files(Some("/x")).await.unwrap(), None);

    client.start_playback("/x.mkv", None).unwrap();
    client.stop_playback().unwrap();
    let silence = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
    assert!(silence.is_err(), "unexpected event: {silence:?}");

    assert!(!client.is_connected());
    assert!(client.current_player_state().is_none());
}
