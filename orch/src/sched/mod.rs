//! Module supervisor.
//!
//! Responsibilities:
//! - Own the live module list and service every module once per [Supervisor::service] call,
//!   in the order the modules were added.
//! - Instantiate registered module types whose dependencies are present, then run the three
//!   setup phases across all modules (see [Supervisor::setup]).
//! - Time each module's service step, warn about modules over the slow threshold and emit a
//!   statistics summary once per monitoring period.
//! - Route status/debug/command/named-value requests to modules by name.
//! - Defer a requested restart long enough for an acknowledgement to go out.
//!
//! Guarantees:
//! - A slow module is reported, never skipped.
//! - Service order is fixed between additions; adding a module marks the cached order dirty
//!   and it is rebuilt at the start of the next pass.

use alloc::{
    boxed::Box,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use log::{info, warn};
use utils::time::{Clock, is_timeout};

use crate::{
    api::{CommsCore, DataSource, RestApiEndpoints},
    config::{ConfigDoc, SupervisorConfig},
    debug_ex,
    error::RetCode,
    platform::Platform,
};

pub mod globals;
pub mod module;
pub mod stats;

pub use globals::DebugGlobals;
pub use module::{ModuleFactory, ModuleStatusChangeCb, ModuleTypeDef, SysMod};
pub use stats::{ExecTimer, SupervisorStats};

/// Config section holding [SupervisorConfig].
pub const SUPERVISOR_CONFIG_SECTION: &str = "SysManager";
/// Delay between a restart request and the platform restart.
pub const SYSTEM_RESTART_DELAY_MS: u64 = 1000;
/// The first statistics report comes early, later ones every monitoring period.
pub const MONITOR_PERIOD_FIRST_SHOW_MS: u64 = 5000;

/// Reserved debug names answered by the supervisor itself.
pub const DEBUG_NAME_STATS: &str = "SysMan";
pub const DEBUG_NAME_GLOBALS: &str = "Globs";
pub const DEBUG_NAME_STATS_CB: &str = "StatsCB";

/// Free-form statistics provider registered by the application.
pub type StatsCb = Box<dyn Fn() -> String + Send>;

pub struct Supervisor {
    config: SupervisorConfig,
    sys_config: ConfigDoc,
    clock: Arc<dyn Clock>,
    platform: Arc<dyn Platform>,

    modules: Vec<Box<dyn SysMod>>,
    module_types: Vec<ModuleTypeDef>,
    service_order: Vec<usize>,
    order_dirty: bool,

    stats: SupervisorStats,
    monitor_started: bool,
    monitor_first_shown: bool,
    monitor_last_ms: u64,
    last_summary: String,
    stats_cb: Option<StatsCb>,
    debug_globals: Arc<DebugGlobals>,

    restart_pending: bool,
    restart_requested_ms: u64,
    reboot_issued: bool,

    rest: Option<Box<dyn RestApiEndpoints>>,
    comms: Option<Box<dyn CommsCore>>,
}

impl Supervisor {
    /// Build a supervisor. Its own tuning is read from [SUPERVISOR_CONFIG_SECTION]; a malformed
    /// section is logged and replaced by defaults.
    pub fn new(sys_config: ConfigDoc, clock: Arc<dyn Clock>, platform: Arc<dyn Platform>) -> Supervisor {
        let config = sys_config
            .deserialize::<SupervisorConfig>(SUPERVISOR_CONFIG_SECTION)
            .unwrap_or_else(|err| {
                warn!("supervisor config ignored: {}", err);
                SupervisorConfig::default()
            });
        Supervisor {
            config,
            sys_config,
            clock,
            platform,
            modules: Vec::new(),
            module_types: Vec::new(),
            service_order: Vec::new(),
            order_dirty: true,
            stats: SupervisorStats::new(),
            monitor_started: false,
            monitor_first_shown: false,
            monitor_last_ms: 0,
            last_summary: String::new(),
            stats_cb: None,
            debug_globals: Arc::new(DebugGlobals::new()),
            restart_pending: false,
            restart_requested_ms: 0,
            reboot_issued: false,
            rest: None,
            comms: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn set_rest_api_endpoints(&mut self, rest: Box<dyn RestApiEndpoints>) {
        self.rest = Some(rest);
    }

    pub fn set_comms_core(&mut self, comms: Box<dyn CommsCore>) {
        self.comms = Some(comms);
    }

    pub fn set_stats_cb(&mut self, cb: StatsCb) {
        self.stats_cb = Some(cb);
    }

    pub fn debug_globals(&self) -> Arc<DebugGlobals> {
        self.debug_globals.clone()
    }

    // region: Registration

    /// Append a module to the live list. `None` is ignored.
    pub fn add(&mut self, module: Option<Box<dyn SysMod>>) {
        let Some(module) = module else {
            return;
        };
        debug_ex!("added module {}", module.name());
        self.modules.push(module);
        self.order_dirty = true;
    }

    /// Register a module type for instantiation during [Supervisor::setup].
    pub fn register_module_type(
        &mut self,
        name: &str,
        factory: ModuleFactory,
        always_enable: bool,
        dependency_csv: &str,
    ) {
        self.module_types
            .push(ModuleTypeDef::new(name, factory, always_enable, dependency_csv));
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    fn has_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name() == name)
    }

    /// Create every enabled registered type whose dependencies exist, repeating until a pass
    /// creates nothing. A type whose factory declines is not retried.
    fn create_registered_modules(&mut self) {
        let mut attempted = alloc::vec![false; self.module_types.len()];
        loop {
            let mut created_any = false;
            for idx in 0..self.module_types.len() {
                if attempted[idx] {
                    continue;
                }
                let def = &self.module_types[idx];
                let enabled = self
                    .sys_config
                    .get_bool(&alloc::format!("{}/enable", def.name), def.always_enable);
                if !enabled || self.has_module(&def.name) {
                    attempted[idx] = true;
                    continue;
                }
                if !def.dependencies.iter().all(|dep| self.has_module(dep)) {
                    continue;
                }
                attempted[idx] = true;
                match (def.factory)(&def.name, &self.sys_config) {
                    Some(module) => {
                        info!("created module {}", def.name);
                        self.add(Some(module));
                        created_any = true;
                    }
                    None => warn!("module type {} failed to create", def.name),
                }
            }
            if !created_any {
                break;
            }
        }
        for (idx, def) in self.module_types.iter().enumerate() {
            if !attempted[idx] {
                warn!(
                    "module type {} not created, unmet dependencies {:?}",
                    def.name, def.dependencies
                );
            }
        }
    }

    // endregion

    /// Create registered module types, then run the setup phases. Each phase completes for
    /// every module before the next phase starts:
    /// 1. [SysMod::setup]
    /// 2. [SysMod::add_rest_api_endpoints] and [SysMod::add_comms_channels], for whichever
    ///    surfaces have been provided
    /// 3. [SysMod::data_source_offers] routed to their publishers, then [SysMod::post_setup]
    pub fn setup(&mut self) {
        self.create_registered_modules();
        for module in self.modules.iter_mut() {
            module.setup();
        }
        for module in self.modules.iter_mut() {
            if let Some(rest) = self.rest.as_deref_mut() {
                module.add_rest_api_endpoints(rest);
            }
            if let Some(comms) = self.comms.as_deref_mut() {
                module.add_comms_channels(comms);
            }
        }
        let offers: Vec<_> = self
            .modules
            .iter()
            .flat_map(|m| m.data_source_offers())
            .collect();
        for offer in offers {
            if !self.register_data_source(&offer.publisher, &offer.topic, offer.source) {
                warn!("data source {} not taken by {}", offer.topic, offer.publisher);
            }
        }
        for module in self.modules.iter_mut() {
            module.post_setup();
        }
        info!("setup complete, {} modules", self.modules.len());
    }

    fn rebuild_service_order(&mut self) {
        self.service_order = (0..self.modules.len()).collect();
        self.stats.clear_modules();
        for module in self.modules.iter() {
            self.stats.add(module.name());
        }
        self.order_dirty = false;
    }

    /// Run one pass: every module's service step once, in list order.
    pub fn service(&mut self) {
        if self.order_dirty {
            self.rebuild_service_order();
        }

        let now_ms = self.clock.millis();
        if !self.monitor_started {
            self.monitor_started = true;
            self.monitor_last_ms = now_ms;
        } else {
            let period = if self.monitor_first_shown {
                self.config.monitor_period_ms
            } else {
                MONITOR_PERIOD_FIRST_SHOW_MS
            };
            if is_timeout(now_ms, self.monitor_last_ms, period) {
                self.monitor_last_ms = now_ms;
                self.monitor_first_shown = true;
                self.stats.calculate();
                self.show_stats();
                self.stats.clear();
            }
        }

        let slow_us = self.config.slow_threshold_us();
        self.stats.outer_loop_started(self.clock.micros());
        for pos in 0..self.service_order.len() {
            let idx = self.service_order[pos];
            self.stats.exec_started(pos, self.clock.micros());
            self.modules[idx].service();
            let elapsed = self.stats.exec_ended(pos, self.clock.micros());
            if elapsed > slow_us {
                self.stats.record_slow(pos);
                warn!(
                    "slow module {} took {}ms",
                    self.modules[idx].name(),
                    elapsed / 1000
                );
            }
        }

        let now_ms = self.clock.millis();
        if self.restart_pending && is_timeout(now_ms, self.restart_requested_ms, SYSTEM_RESTART_DELAY_MS) {
            self.restart_pending = false;
            info!("restarting");
            self.platform.restart();
        }
        let reboot_after_ms = self.config.reboot_after_n_hours.saturating_mul(3_600_000);
        if reboot_after_ms != 0 && !self.reboot_issued && now_ms >= reboot_after_ms {
            self.reboot_issued = true;
            info!("rebooting after {} hours", self.config.reboot_after_n_hours);
            self.platform.restart();
        }

        self.stats.outer_loop_ended(self.clock.micros());
        self.stats.calculate();
    }

    fn show_stats(&mut self) {
        self.last_summary = self.stats.summary_json();
        info!("{}", self.last_summary);
        for name in self.config.report_list.iter() {
            if let Some(module) = self.modules.iter().find(|m| m.name() == name) {
                info!("{} {}", name, module.status_json());
            }
        }
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// The summary emitted by the most recent statistics report.
    pub fn last_summary(&self) -> &str {
        &self.last_summary
    }

    // region: Restart

    /// Arm a deferred restart. Modules are told about it immediately.
    pub fn request_restart(&mut self) {
        for module in self.modules.iter_mut() {
            module.notify_of_shutdown();
        }
        self.restart_pending = true;
        self.restart_requested_ms = self.clock.millis();
    }

    pub fn is_restart_pending(&self) -> bool {
        self.restart_pending
    }

    // endregion

    // region: Named routing

    fn find(&self, name: &str) -> Option<&dyn SysMod> {
        self.modules.iter().find(|m| m.name() == name).map(|m| &**m)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Box<dyn SysMod>> {
        self.modules.iter_mut().find(|m| m.name() == name)
    }

    /// Status of the named module, or `{}`.
    pub fn get_status_json(&self, module_name: &str) -> String {
        self.find(module_name)
            .map(|m| m.status_json())
            .unwrap_or_else(|| "{}".to_string())
    }

    /// Debug JSON of the named module, or `{}`. The reserved names [DEBUG_NAME_STATS],
    /// [DEBUG_NAME_GLOBALS] and [DEBUG_NAME_STATS_CB] are matched case-insensitively first.
    pub fn get_debug_json(&self, module_name: &str) -> String {
        if module_name.eq_ignore_ascii_case(DEBUG_NAME_STATS) {
            return self.stats.summary_json();
        }
        if module_name.eq_ignore_ascii_case(DEBUG_NAME_GLOBALS) {
            return self.debug_globals.to_json();
        }
        if module_name.eq_ignore_ascii_case(DEBUG_NAME_STATS_CB) {
            return self.stats_cb.as_ref().map(|cb| cb()).unwrap_or_default();
        }
        self.find(module_name)
            .map(|m| m.debug_json())
            .unwrap_or_else(|| "{}".to_string())
    }

    /// Deliver a JSON command. Unknown modules yield [RetCode::InvalidOperation].
    pub fn send_cmd_json(&mut self, module_name: &str, cmd_json: &str) -> RetCode {
        match self.find_mut(module_name) {
            Some(module) => module.receive_cmd_json(cmd_json),
            None => RetCode::InvalidOperation,
        }
    }

    pub fn get_named_value(&self, module_name: &str, value_name: &str) -> Option<f64> {
        self.find(module_name)?.named_value(value_name)
    }

    pub fn set_named_value(&mut self, module_name: &str, value_name: &str, value: f64) -> bool {
        self.find_mut(module_name)
            .map(|m| m.set_named_value(value_name, value))
            .unwrap_or(false)
    }

    pub fn get_named_string(&self, module_name: &str, value_name: &str) -> Option<String> {
        self.find(module_name)?.named_string(value_name)
    }

    pub fn set_named_string(&mut self, module_name: &str, value_name: &str, value: &str) -> bool {
        self.find_mut(module_name)
            .map(|m| m.set_named_string(value_name, value))
            .unwrap_or(false)
    }

    pub fn set_status_change_cb(&mut self, module_name: &str, cb: ModuleStatusChangeCb) -> bool {
        match self.find_mut(module_name) {
            Some(module) => {
                module.set_status_change_cb(cb);
                true
            }
            None => false,
        }
    }

    /// Hand a data source to a publishing module.
    pub fn register_data_source(&mut self, module_name: &str, topic: &str, source: DataSource) -> bool {
        self.find_mut(module_name)
            .map(|m| m.register_data_source(topic, source))
            .unwrap_or(false)
    }

    // endregion
}
