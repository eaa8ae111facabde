//! Background poster downloads.
//!
//! Extra pushes may carry poster addresses. Fetching them happens off the
//! receive path: one download at a time, bounded by the configured poster
//! timeout, and attached to the playback only if that playback is still the
//! current one when the image arrives.

use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    events::Event,
    player::{Poster, SharedState},
};

#[derive(Clone)]
pub struct PosterFetcher {
    http: reqwest::Client,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl PosterFetcher {
    /// Creates a fetcher whose downloads stop when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.poster_timeout)
            .read_timeout(config.poster_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(1)),
            cancel,
        })
    }

    /// Downloads the first poster that can be fetched and decoded from
    /// `urls`, then stores it in `state` if playback `generation` is still
    /// current.
    pub fn schedule(
        &self,
        urls: Vec<Url>,
        generation: u64,
        state: SharedState,
        events: broadcast::Sender<Event>,
    ) {
        if urls.is_empty() {
            return;
        }

        let fetcher = self.clone();
        tokio::spawn(async move {
            let poster = tokio::select! {
                () = fetcher.cancel.cancelled() => return,
                poster = fetcher.fetch_first(&urls) => poster,
            };

            let Some(poster) = poster else {
                warn!("no poster could be downloaded");
                return;
            };

            let attached = match state.write() {
                Ok(mut state) => match state.as_mut() {
                    Some(current) if current.generation() == generation => {
                        current.set_poster(poster);
                        true
                    }
                    _ => false,
                },
                Err(e) => {
                    error!("player state unavailable: {e}");
                    false
                }
            };

            if attached {
                let _ = events.send(Event::ExtraUpdated);
            } else {
                debug!("discarding poster of a finished playback");
            }
        });
    }

    /// Tries `urls` in order and returns the first poster that loads.
    pub async fn fetch_first(&self, urls: &[Url]) -> Option<Poster> {
        let Ok(_permit) = self.permits.acquire().await else {
            return None;
        };

        for url in urls {
            match self.fetch(url).await {
                Ok(poster) => {
                    let (width, height) = poster.dimensions();
                    debug!("downloaded {width}x{height} poster from {url}");
                    return Some(poster);
                }
                Err(e) => warn!("failed to download poster from {url}: {e}"),
            }
        }

        None
    }

    /// Downloads and decodes a single poster.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, the server answers with an error
    /// status, or the body is not a supported image.
    pub async fn fetch(&self, url: &Url) -> Result<Poster> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::unavailable(format!("poster server returned {status}")));
        }

        let body = response.bytes().await?;
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&body)).await??;

        Ok(Poster {
            source: url.clone(),
            image: Arc::new(image),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, time::Duration};

    use image::{ImageFormat, RgbImage};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Serves `body` as a PNG to the first request, after `delay`.
    async fn serve_once(body: Vec<u8>, delay: Duration) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/poster.png", listener.local_addr().unwrap()))
            .unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0; 1024];
            let _ = stream.read(&mut request).await.unwrap();

            tokio::time::sleep(delay).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: image/png\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        url
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        RgbImage::new(width, height)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[tokio::test]
    async fn downloads_and_decodes_posters() {
        let fetcher = PosterFetcher::new(&Config::default(), CancellationToken::new()).unwrap();
        let url = serve_once(png(4, 6), Duration::ZERO).await;

        let poster = fetcher.fetch(&url).await.unwrap();
        assert_eq!(poster.dimensions(), (4, 6));
        assert_eq!(poster.source, url);
    }

    #[tokio::test]
    async fn slow_hosts_get_the_whole_poster_timeout() {
        let config = Config {
            poster_timeout: Duration::from_secs(10),
            ..Config::default()
        };
        let fetcher = PosterFetcher::new(&config, CancellationToken::new()).unwrap();
        let url = serve_once(png(1, 1), Duration::from_millis(5_500)).await;

        let poster = fetcher.fetch_first(&[url]).await.unwrap();
        assert_eq!(poster.dimensions(), (1, 1));
    }

    #[tokio::test]
    async fn undecodable_bodies_are_errors() {
        let fetcher = PosterFetcher::new(&Config::default(), CancellationToken::new()).unwrap();
        let url = serve_once(b"not an image".to_vec(), Duration::ZERO).await;

        assert!(fetcher.fetch(&url).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_posters_yield_nothing() {
        let config = Config {
            poster_timeout: Duration::from_millis(500),
            ..Config::default()
        };
        let fetcher = PosterFetcher::new(&config, CancellationToken::new()).unwrap();

        // Port 9 on loopback is never served in test environments.
        let urls = vec![Url::parse("http://127.0.0.1:9/poster.jpg").unwrap()];
        assert!(fetcher.fetch_first(&urls).await.is_none());
        assert!(fetcher.fetch_first(&[]).await.is_none());
    }
}
