//! Ground elevation lookups behind the bounded cache.
//!
//! Cache hits are answered synchronously. Misses are queued to a worker task
//! that applies the leading + trailing throttle, calls the elevation service
//! and reports results on a channel.

use anyhow::{Result, anyhow};
use log::{debug, warn};
use skycore::elevation::{
    ElevationCache, ElevationKey, LookupResponse, LookupThrottle, ThrottleDecision, lookup_url,
};
use skycore::net::{HttpClient, HttpRequest};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// A resolved lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationUpdate {
    pub key: ElevationKey,
    pub elevation: f64,
}

/// Cheap handle to the cache and the lookup worker.
#[derive(Clone)]
pub struct ElevationService {
    cache: Arc<Mutex<ElevationCache>>,
    requests: mpsc::UnboundedSender<ElevationKey>,
}

impl ElevationService {
    /// Spawns the lookup worker. Resolved values arrive on the returned
    /// receiver after they have been cached.
    pub fn spawn(
        http_client: Arc<dyn HttpClient>,
        host: String,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ElevationUpdate>, JoinHandle<()>) {
        let cache = Arc::new(Mutex::new(ElevationCache::with_capacity(capacity)));
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::channel(32);

        let worker = LookupWorker {
            http_client,
            host,
            cache: cache.clone(),
            throttle: LookupThrottle::default(),
            updates: update_tx,
        };
        let handle = tokio::spawn(worker.run(request_rx));

        (
            Self {
                cache,
                requests: request_tx,
            },
            update_rx,
            handle,
        )
    }

    /// Cache lookup without side effects.
    pub fn cached(&self, key: &ElevationKey) -> Option<f64> {
        self.cache.lock().ok()?.get(key)
    }

    /// Returns the cached value, or queues a lookup and returns `None`.
    pub fn get(&self, key: &ElevationKey) -> Option<f64> {
        let hit = self.cached(key);
        if hit.is_none() && self.requests.send(*key).is_err() {
            debug!(target: "Elevation", "Lookup worker gone, dropping request for {key:?}");
        }
        hit
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct LookupWorker {
    http_client: Arc<dyn HttpClient>,
    host: String,
    cache: Arc<Mutex<ElevationCache>>,
    throttle: LookupThrottle,
    updates: mpsc::Sender<ElevationUpdate>,
}

impl LookupWorker {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<ElevationKey>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(ElevationKey, Result<f64>)>();

        loop {
            let trailing = self.throttle.trailing_due();
            tokio::select! {
                key = requests.recv() => {
                    let Some(key) = key else { break };
                    if self.is_cached(&key) {
                        continue;
                    }
                    match self.throttle.request(key, Instant::now()) {
                        ThrottleDecision::Fire(key) => self.fetch(key, done_tx.clone()),
                        ThrottleDecision::Deferred { due } => {
                            debug!(target: "Elevation", "Lookup for {key:?} deferred until {due:?}");
                        }
                        ThrottleDecision::Duplicate => {}
                    }
                }
                Some((key, result)) = done_rx.recv() => {
                    self.throttle.complete(key);
                    self.finish(key, result).await;
                }
                _ = sleep_until(trailing.unwrap_or_else(Instant::now)), if trailing.is_some() => {
                    if let Some(key) = self.throttle.poll_trailing(Instant::now()) {
                        if self.is_cached(&key) {
                            self.throttle.complete(key);
                        } else {
                            self.fetch(key, done_tx.clone());
                        }
                    }
                }
            }
        }
        debug!(target: "Elevation", "Lookup worker stopped");
    }

    fn is_cached(&self, key: &ElevationKey) -> bool {
        self.cache.lock().map(|c| c.contains(key)).unwrap_or(false)
    }

    fn fetch(&self, key: ElevationKey, done: mpsc::UnboundedSender<(ElevationKey, Result<f64>)>) {
        let http_client = self.http_client.clone();
        let url = lookup_url(&self.host, &key);
        tokio::spawn(async move {
            let result = fetch_elevation(http_client.as_ref(), url).await;
            let _ = done.send((key, result));
        });
    }

    async fn finish(&mut self, key: ElevationKey, result: Result<f64>) {
        match result {
            Ok(elevation) => {
                if let Ok(mut cache) = self.cache.lock() {
                    for evicted in cache.insert(key, elevation) {
                        debug!(target: "Elevation", "Evicted {evicted:?}");
                    }
                }
                let _ = self.updates.send(ElevationUpdate { key, elevation }).await;
            }
            Err(e) => {
                warn!(target: "Elevation", "Elevation lookup for ({}, {}) failed: {e:#}", key.lat(), key.lon());
            }
        }
    }
}

async fn fetch_elevation(http_client: &dyn HttpClient, url: String) -> Result<f64> {
    debug!(target: "Elevation", "GET {url}");
    let response = http_client
        .execute(HttpRequest::get(url).with_header("Accept", "application/json"))
        .await?;
    if !response.is_success() {
        return Err(anyhow!("elevation service returned {}", response.status_code));
    }
    let body: LookupResponse = serde_json::from_slice(&response.body)?;
    body.first_elevation()
        .ok_or_else(|| anyhow!("elevation service returned no result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skycore::net::HttpResponse;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeElevationApi {
        urls: StdMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl HttpClient for FakeElevationApi {
        async fn execute(&self, request: HttpRequest) -> Result<skycore::net::HttpResponse> {
            self.urls.lock().unwrap().push(request.url);
            if self.fail {
                return Ok(HttpResponse {
                    status_code: 503,
                    body: Vec::new(),
                });
            }
            Ok(HttpResponse {
                status_code: 200,
                body: br#"{"results":[{"elevation":430.0}]}"#.to_vec(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_fetches_then_hit_is_synchronous() {
        let api = Arc::new(FakeElevationApi::default());
        let (service, mut updates, _worker) =
            ElevationService::spawn(api.clone(), "https://elevation.test".into(), 100);
        let key = ElevationKey::new(46.77, 23.59);

        assert_eq!(service.get(&key), None);
        let update = updates.recv().await.unwrap();
        assert_eq!(update, ElevationUpdate { key, elevation: 430.0 });
        assert_eq!(service.get(&key), Some(430.0));
        assert_eq!(
            api.urls.lock().unwrap().as_slice(),
            ["https://elevation.test/lookup?locations=46.77,23.59"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_throttled_to_leading_and_trailing() {
        let api = Arc::new(FakeElevationApi::default());
        let (service, mut updates, _worker) =
            ElevationService::spawn(api.clone(), "https://elevation.test".into(), 100);

        for i in 0..10 {
            service.get(&ElevationKey::new(46.0 + i as f64 * 1e-3, 23.0));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let first = updates.recv().await.unwrap();
        let last = updates.recv().await.unwrap();
        assert_eq!(first.key, ElevationKey::new(46.0, 23.0));
        assert_eq!(last.key, ElevationKey::new(46.009, 23.0));
        assert_eq!(api.urls.lock().unwrap().len(), 2);
        assert_eq!(service.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_is_not_cached() {
        let api = Arc::new(FakeElevationApi {
            fail: true,
            ..Default::default()
        });
        let (service, mut updates, _worker) =
            ElevationService::spawn(api.clone(), "https://elevation.test".into(), 100);
        let key = ElevationKey::new(46.77, 23.59);
        service.get(&key);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(updates.try_recv().is_err());
        assert!(service.is_empty());
        assert_eq!(api.urls.lock().unwrap().len(), 1);
    }
}
