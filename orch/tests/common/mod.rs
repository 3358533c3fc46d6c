#![allow(dead_code)]

use orch::{
    Clock, RetCode,
    api::{CommsChannel, CommsCore, DataSource, DataSourceOffer, RestApiEndpoint, RestApiEndpoints},
    platform::Platform,
    sched::SysMod,
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct ManualClock {
    us: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<ManualClock> {
        Arc::new(ManualClock::default())
    }
    pub fn advance_us(&self, us: u64) {
        self.us.fetch_add(us, Ordering::SeqCst);
    }
    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

impl Clock for ManualClock {
    fn micros(&self) -> u64 {
        self.us.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub restarts: AtomicU32,
}

impl RecordingPlatform {
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl Platform for RecordingPlatform {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Module that writes `<name>.<hook>` to a shared journal and can burn clock time.
pub struct RecordingModule {
    name: String,
    journal: Journal,
    clock: Option<Arc<ManualClock>>,
    service_cost_us: u64,
    value: f64,
    sources: Vec<String>,
    offers: Vec<(String, String)>,
}

impl RecordingModule {
    pub fn new(name: &str, journal: &Journal) -> RecordingModule {
        RecordingModule {
            name: name.to_string(),
            journal: journal.clone(),
            clock: None,
            service_cost_us: 0,
            value: 0.0,
            sources: Vec::new(),
            offers: Vec::new(),
        }
    }

    /// Offer a data source producing the module's name to `publisher` under `topic`.
    pub fn offers(mut self, publisher: &str, topic: &str) -> RecordingModule {
        self.offers.push((publisher.to_string(), topic.to_string()));
        self
    }

    /// Each service step advances `clock` by `cost_us`.
    pub fn slow(mut self, clock: &Arc<ManualClock>, cost_us: u64) -> RecordingModule {
        self.clock = Some(clock.clone());
        self.service_cost_us = cost_us;
        self
    }

    pub fn boxed(self) -> Option<Box<dyn SysMod>> {
        Some(Box::new(self))
    }

    fn record(&self, hook: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}.{}", self.name, hook));
    }
}

impl SysMod for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }
    fn setup(&mut self) {
        self.record("setup");
    }
    fn add_rest_api_endpoints(&mut self, _endpoints: &mut dyn RestApiEndpoints) {
        self.record("rest");
    }
    fn data_source_offers(&self) -> Vec<DataSourceOffer> {
        self.offers
            .iter()
            .map(|(publisher, topic)| {
                let payload = self.name.clone().into_bytes();
                DataSourceOffer {
                    publisher: publisher.clone(),
                    topic: topic.clone(),
                    source: DataSource {
                        msg_gen: Arc::new(move || payload.clone()),
                        state_detect: Arc::new(|| [0, 0]),
                    },
                }
            })
            .collect()
    }
    fn post_setup(&mut self) {
        self.record("postSetup");
    }
    fn service(&mut self) {
        self.record("service");
        if let Some(clock) = &self.clock {
            clock.advance_us(self.service_cost_us);
        }
    }
    fn status_json(&self) -> String {
        format!(r#"{{"name":"{}"}}"#, self.name)
    }
    fn receive_cmd_json(&mut self, cmd_json: &str) -> RetCode {
        self.record(&format!("cmd {}", cmd_json));
        RetCode::Ok
    }
    fn named_value(&self, value_name: &str) -> Option<f64> {
        (value_name == "v").then_some(self.value)
    }
    fn set_named_value(&mut self, value_name: &str, value: f64) -> bool {
        if value_name != "v" {
            return false;
        }
        self.value = value;
        true
    }
    fn register_data_source(&mut self, topic: &str, source: DataSource) -> bool {
        self.sources.push(topic.to_string());
        let msg = (source.msg_gen)();
        self.record(&format!("source {} {}", topic, msg.len()));
        true
    }
    fn notify_of_shutdown(&mut self) {
        self.record("shutdown");
    }
}

/// REST surface that keeps what it is given.
#[derive(Clone, Default)]
pub struct EndpointList {
    pub endpoints: Arc<Mutex<Vec<RestApiEndpoint>>>,
}

impl EndpointList {
    pub fn names(&self) -> Vec<String> {
        self.endpoints
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn call(&self, name: &str, request: &str) -> Option<String> {
        let handler = self
            .endpoints
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.handler.clone())?;
        Some(handler(request))
    }
}

impl RestApiEndpoints for EndpointList {
    fn add_endpoint(&mut self, endpoint: RestApiEndpoint) {
        self.endpoints.lock().unwrap().push(endpoint);
    }
}

#[derive(Default)]
pub struct NullComms;

impl CommsCore for NullComms {
    fn register_channel(&mut self, _channel: CommsChannel) -> Option<u32> {
        None
    }
}
