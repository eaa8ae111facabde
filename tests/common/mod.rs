//! Fake server on a loopback UDP socket.

#![allow(dead_code)]

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use omxremote::{
    config::Config,
    events::Event,
    protocol::{codec, Flags, Frame, Header},
};
use tokio::{net::UdpSocket, sync::broadcast};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeServer {
    socket: UdpSocket,
    client: Option<SocketAddr>,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        Self {
            socket,
            client: None,
        }
    }

    /// Client configuration pointing at this server. Keepalives are pushed
    /// far out so that only the frames under test are exchanged.
    pub fn config(&self) -> Config {
        Config {
            group: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: self.socket.local_addr().unwrap().port(),
            bind_port: Some(0),
            receive_timeout: TIMEOUT,
            keepalive_connected: Duration::from_secs(60),
            keepalive_disconnected: Duration::from_secs(60),
            request_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    /// Next frame from the client, keepalives skipped.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(TIMEOUT, self.recv_any())
            .await
            .expect("no frame from client")
    }

    async fn recv_any(&mut self) -> Frame {
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let (len, source) = self.socket.recv_from(&mut buffer).await.unwrap();
            self.client = Some(source);

            let frame = Frame::decode(&buffer[..len]).unwrap();
            if frame.header != Header::Keepalive {
                return frame;
            }
        }
    }

    /// Asserts that the client sends nothing but keepalives for `duration`.
    pub async fn assert_silent(&mut self, duration: Duration) {
        if let Ok(frame) = tokio::time::timeout(duration, self.recv_any()).await {
            panic!("unexpected {} frame: {:?}", frame.header, frame.text());
        }
    }

    /// Sends a message, fragmented to `buffer_size`.
    pub async fn send_fragmented(&self, header: Header, payload: &str, buffer_size: usize) {
        let client = self.client.expect("client address not yet known");
        let datagrams = codec::encode(
            header,
            payload.as_bytes(),
            Flags::WITHOUT_SESSION_ID,
            "",
            buffer_size,
        )
        .unwrap();

        for datagram in datagrams {
            self.socket.send_to(&datagram, client).await.unwrap();
        }
    }

    pub async fn send(&self, header: Header, payload: &str) {
        self.send_fragmented(header, payload, 1500).await;
    }

    /// Waits for the login request and answers it.
    pub async fn accept_login(&mut self, session_id: &str, buffer_size: usize) {
        let login = self.recv().await;
        assert_eq!(login.header, Header::Login);
        assert!(login.flags.contains(Flags::WITHOUT_SESSION_ID));
        assert_eq!(login.text(), "RPi::omxremote");

        self.send(Header::Login, &format!("{session_id}({buffer_size})"))
            .await;
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("no event")
        .unwrap()
}
