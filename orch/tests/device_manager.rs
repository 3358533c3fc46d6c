mod common;

use common::*;
use orch::{
    Clock, RetCode,
    bus::{BusAddrStatus, DeviceOnlineState, SimBus},
    config::ConfigDoc,
    dev::{DEVICE_TYPE_INDEX_INVALID, Device, DeviceId, binary::BinaryDataMsg, demo::DEMO_SAMPLE_LEN},
    devman::{DEVICE_MANAGER_NAME, DEVMAN_ENDPOINT_NAME, DEVMAN_JSON_TOPIC, DEVMAN_PUBLISHER, DeviceManager},
    sched::Supervisor,
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    thread,
};

fn sim_bus_config() -> Value {
    json!({
        "Buses": {"buslist": [{
            "type": "sim",
            "name": "SIMA",
            "pollMs": 50,
            "devices": [
                {"addr": "0x20", "type": "VCNL4040"},
                {"addr": "0x21", "type": "LSM6DS"}
            ]
        }]}
    })
}

fn demo_config() -> Value {
    json!({"Devices": [{"class": "DemoDevice", "name": "imu", "sampleRateMs": 50}]})
}

fn manager(config: Value) -> (DeviceManager, Arc<ManualClock>) {
    init_logging();
    let clock = ManualClock::new();
    let mgr = DeviceManager::new(ConfigDoc::new(config), clock.clone());
    (mgr, clock)
}

fn sim_bus(mgr: &DeviceManager) -> Arc<dyn orch::bus::Bus> {
    mgr.bus_registry().get_bus_by_number(1).expect("bus 1")
}

#[test]
fn empty_manager_publishes_nothing() {
    let (mgr, _clock) = manager(json!({}));
    mgr.setup();
    mgr.post_setup();
    mgr.service();
    assert_eq!(mgr.get_devices_data_json(), "");
    assert!(mgr.get_devices_data_binary().is_empty());
    assert_eq!(mgr.get_devices_hash(), [0, 0]);
    assert!(mgr.get_device_list_frozen(usize::MAX, false).is_empty());
}

#[test]
fn direct_device_keyed_by_publish_type() {
    let (mgr, _clock) = manager(demo_config());
    mgr.setup();
    mgr.post_setup();

    let frozen = mgr.get_device_list_frozen(usize::MAX, true);
    assert_eq!(frozen.len(), 1);
    assert_eq!(frozen[0].device.id(), DeviceId::direct(0));
    assert_eq!(frozen[0].device.name(), "imu");

    let data: Value = serde_json::from_str(&mgr.get_devices_data_json()).unwrap();
    let obj = data.as_object().unwrap();
    assert_eq!(obj.len(), 1);
    assert_eq!(data["ACCDEMO"]["0"]["_t"], "ACCDEMO");
    assert_eq!(data["ACCDEMO"]["0"]["x"].as_str().unwrap().len(), DEMO_SAMPLE_LEN * 2);
}

#[test]
fn direct_device_binary_record() {
    let (mgr, _clock) = manager(demo_config());
    mgr.setup();
    let bin = mgr.get_devices_data_binary();
    let msgs: Vec<_> = BinaryDataMsg::iter(&bin).collect();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].bus_num, 0);
    assert_eq!(msgs[0].address, 0);
    assert!(msgs[0].online);
    assert!(!msgs[0].pending_deletion);
    assert_eq!(Some(msgs[0].dev_type_idx), mgr.type_catalog().index_by_name("ACCDEMO"));
    assert_eq!(msgs[0].data.len(), DEMO_SAMPLE_LEN);
}

#[test]
fn sim_bus_discovery_creates_bus_devices() {
    let (mgr, _clock) = manager(sim_bus_config());
    mgr.setup();
    assert_eq!(mgr.bus_registry().len(), 1);
    assert!(mgr.get_device_list_frozen(usize::MAX, false).is_empty());

    mgr.service();
    let frozen = mgr.get_device_list_frozen(usize::MAX, false);
    assert_eq!(frozen.len(), 2);
    assert!(frozen.iter().all(|e| e.online));

    let dev = mgr.get_device_by_id(DeviceId::new(1, 0x20)).unwrap();
    assert_eq!(dev.name(), "SIMA_20");
    assert_eq!(dev.class_name(), "BusDevice");
    assert_eq!(dev.publish_device_type(), "VCNL4040");
    assert!(Arc::ptr_eq(&dev, &mgr.get_device("1_20").unwrap()));
    assert!(Arc::ptr_eq(&dev, &mgr.get_device("SIMA_20").unwrap()));
    assert!(mgr.get_device("1_99").is_none());

    let data: Value = serde_json::from_str(&mgr.get_devices_data_json()).unwrap();
    assert_eq!(data["1"]["20"]["_t"], "VCNL4040");
    assert_eq!(data["1"]["21"]["_t"], "LSM6DS");
    // Poll data is handed out once.
    assert_eq!(mgr.get_devices_data_json(), "");
}

#[test]
fn repeated_identification_reuses_device() {
    let (mgr, clock) = manager(sim_bus_config());
    mgr.setup();
    mgr.service();
    let first = mgr.get_device_by_id(DeviceId::new(1, 0x20)).unwrap();

    let type_idx = mgr.type_catalog().index_by_name("VCNL4040").unwrap();
    mgr.handle_bus_elem_status(1, &[BusAddrStatus::identified(0x20, type_idx)]);
    for _ in 0..5 {
        clock.advance_ms(50);
        mgr.service();
    }

    let frozen = mgr.get_device_list_frozen(usize::MAX, false);
    assert_eq!(frozen.len(), 2);
    assert!(Arc::ptr_eq(&first, &mgr.get_device_by_id(DeviceId::new(1, 0x20)).unwrap()));
}

#[test]
fn presence_changes_reach_status_subscribers() {
    let (mgr, _clock) = manager(sim_bus_config());
    let seen: Arc<Mutex<Vec<(DeviceId, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    assert!(mgr.register_for_device_status(
        DeviceId::any(),
        Arc::new(move |dev: &dyn Device, status: &BusAddrStatus| {
            sink.lock()
                .unwrap()
                .push((dev.id(), status.online_state.is_online()));
        }),
    ));
    let only_20 = Arc::new(AtomicU32::new(0));
    let count = only_20.clone();
    mgr.register_for_device_status(
        DeviceId::new(1, 0x20),
        Arc::new(move |_: &dyn Device, _: &BusAddrStatus| {
            count.fetch_add(1, Ordering::SeqCst);
        }),
    );
    mgr.setup();
    mgr.service();
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(only_20.load(Ordering::SeqCst), 1);

    let bus = sim_bus(&mgr);
    let sim = SimBus::from_bus(bus.as_ref()).unwrap();
    sim.set_present(0x20, false);
    mgr.service();
    assert_eq!(
        seen.lock().unwrap().last().copied(),
        Some((DeviceId::new(1, 0x20), false))
    );
    let online = mgr.get_device_list_frozen(usize::MAX, true);
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].device.id(), DeviceId::new(1, 0x21));
    assert_eq!(mgr.get_device_list_frozen(usize::MAX, false).len(), 2);
    let dev = mgr.get_device_by_id(DeviceId::new(1, 0x20)).unwrap();
    assert_eq!(dev.base().online_state(), DeviceOnlineState::Offline);

    sim.set_present(0x20, true);
    mgr.service();
    assert_eq!(
        seen.lock().unwrap().last().copied(),
        Some((DeviceId::new(1, 0x20), true))
    );
    assert_eq!(mgr.get_device_list_frozen(usize::MAX, true).len(), 2);
    assert_eq!(only_20.load(Ordering::SeqCst), 3);
}

#[test]
fn data_subscription_hooked_once_per_device() {
    let (mgr, clock) = manager(sim_bus_config());
    let samples = Arc::new(AtomicU32::new(0));
    let count = samples.clone();
    mgr.setup();
    assert!(mgr.register_for_device_data(
        DeviceId::any(),
        Arc::new(move |_: u16, data: &[u8]| {
            assert_eq!(data.len(), 4);
            count.fetch_add(1, Ordering::SeqCst);
        }),
        0,
    ));
    mgr.post_setup();

    // The first samples are taken before the devices exist.
    mgr.service();
    assert_eq!(samples.load(Ordering::SeqCst), 0);

    clock.advance_ms(50);
    mgr.service();
    assert_eq!(samples.load(Ordering::SeqCst), 2);

    mgr.register_for_device_data_change_cbs(DeviceId::any());
    mgr.post_setup();
    clock.advance_ms(50);
    mgr.service();
    assert_eq!(samples.load(Ordering::SeqCst), 4);
}

#[test]
fn device_list_skips_disabled_and_unknown_classes() {
    let (mgr, _clock) = manager(json!({}));
    let added = mgr.setup_devices(
        "Devices",
        &ConfigDoc::new(json!({"Devices": [
            {"class": "NoSuchClass", "name": "x"},
            {"class": "DemoDevice", "name": "off", "enable": false},
            {"class": "DemoDevice", "name": "on"}
        ]})),
    );
    assert_eq!(added, 1);
    assert!(mgr.get_device_by_name("x").is_none());
    assert!(mgr.get_device_by_name("off").is_none());
    assert_eq!(mgr.get_device_by_name("on").unwrap().id(), DeviceId::direct(0));

    let added = mgr.setup_devices(
        "More",
        &ConfigDoc::new(json!({"More": [{"class": "DemoDevice", "name": "second"}]})),
    );
    assert_eq!(added, 1);
    assert_eq!(mgr.get_device_by_name("second").unwrap().id(), DeviceId::direct(1));
}

#[test]
fn elements_without_valid_type_are_not_created() {
    let (mgr, _clock) = manager(sim_bus_config());
    mgr.setup();
    mgr.handle_bus_elem_status(1, &[BusAddrStatus::identified(0x40, DEVICE_TYPE_INDEX_INVALID)]);
    // Not newly identified, so nothing to create from.
    mgr.handle_bus_elem_status(1, &[BusAddrStatus::transition(0x41, DeviceOnlineState::Online)]);
    // No such bus.
    mgr.handle_bus_elem_status(7, &[BusAddrStatus::identified(0x42, 0)]);
    assert!(mgr.get_device_list_frozen(usize::MAX, false).is_empty());
}

#[test]
fn hash_tracks_bus_updates() {
    let (mgr, clock) = manager(sim_bus_config());
    clock.advance_ms(0x1234);
    mgr.setup();
    mgr.service();
    assert_eq!(mgr.get_devices_hash(), [0x34, 0x12]);

    // Nothing due, nothing changed.
    clock.advance_ms(10);
    mgr.service();
    assert_eq!(mgr.get_devices_hash(), [0x34, 0x12]);

    clock.advance_ms(40);
    mgr.service();
    let now = clock.millis() as u32;
    assert_eq!(mgr.get_devices_hash(), [now as u8, (now >> 8) as u8]);
}

#[test]
fn hash_follows_direct_device_data() {
    let (mgr, clock) = manager(demo_config());
    mgr.setup();
    assert_eq!(mgr.get_devices_hash(), [0, 0]);
    clock.advance_ms(300);
    mgr.service();
    assert_eq!(mgr.get_devices_hash(), [0x2c, 0x01]);
}

#[test]
fn supervised_manager_reports_counts_and_routes_commands() {
    init_logging();
    let clock = ManualClock::new();
    let mut config = sim_bus_config();
    config["Devices"] = demo_config()["Devices"].clone();
    let mgr = DeviceManager::new(ConfigDoc::new(config.clone()), clock.clone());
    let mut sup = Supervisor::new(
        ConfigDoc::new(config),
        clock.clone(),
        Arc::new(RecordingPlatform::default()),
    );
    let endpoints = EndpointList::default();
    sup.set_rest_api_endpoints(Box::new(endpoints.clone()));
    sup.add(mgr.as_module());
    sup.setup();
    sup.service();

    assert_eq!(sup.get_named_value(DEVICE_MANAGER_NAME, "numDevices"), Some(3.0));
    assert_eq!(sup.get_named_value(DEVICE_MANAGER_NAME, "numOnline"), Some(3.0));
    let status: Value = serde_json::from_str(&sup.get_status_json(DEVICE_MANAGER_NAME)).unwrap();
    assert_eq!(status["numDevices"], 3);
    assert_eq!(status["buses"][0]["name"], "SIMA");

    assert_eq!(sup.send_cmd_json(DEVICE_MANAGER_NAME, r#"{"dev":"nobody"}"#), RetCode::NotFound);
    assert_eq!(sup.send_cmd_json(DEVICE_MANAGER_NAME, "not json"), RetCode::InvalidData);
    assert_eq!(sup.send_cmd_json(DEVICE_MANAGER_NAME, r#"{"dev":"imu"}"#), RetCode::InvalidOperation);

    let debug: Value = serde_json::from_str(&sup.get_debug_json(DEVICE_MANAGER_NAME)).unwrap();
    assert_eq!(debug["devices"]["1_20"]["online"], true);
    assert_eq!(debug["buses"]["SIMA"]["elems"].as_array().unwrap().len(), 2);

    assert_eq!(endpoints.names(), [DEVMAN_ENDPOINT_NAME]);
    let listed: Value = serde_json::from_str(&endpoints.call(DEVMAN_ENDPOINT_NAME, "devices").unwrap()).unwrap();
    assert_eq!(listed["devices"], json!(["0_0", "1_20", "1_21"]));
}

#[test]
fn type_info_from_bus_then_catalog() {
    let (mgr, _clock) = manager(json!({
        "Buses": sim_bus_config()["Buses"].clone(),
        "Devices": demo_config()["Devices"].clone()
    }));
    mgr.setup();

    let info: Value = serde_json::from_str(&mgr.dev_type_info_json("sima", "VCNL4040").unwrap()).unwrap();
    assert_eq!(info["name"], "VCNL4040");
    let info: Value = serde_json::from_str(&mgr.dev_type_info_json("", "ACCDEMO").unwrap()).unwrap();
    assert_eq!(info["b"], DEMO_SAMPLE_LEN);
    assert_eq!(info["info"]["resp"]["a"].as_array().unwrap().len(), 6);
    assert!(mgr.dev_type_info_json("SIMA", "NOPE").is_none());
}

#[test]
fn devman_endpoint_answers_type_info() {
    let (mut mgr, _clock) = manager(sim_bus_config());
    let mut endpoints = EndpointList::default();
    orch::sched::SysMod::setup(&mut mgr);
    orch::sched::SysMod::add_rest_api_endpoints(&mut mgr, &mut endpoints);

    let ok: Value = serde_json::from_str(
        &endpoints.call(DEVMAN_ENDPOINT_NAME, "typeinfo/SIMA/LSM6DS").unwrap(),
    )
    .unwrap();
    assert_eq!(ok["rslt"], "ok");
    assert_eq!(ok["devinfo"]["name"], "LSM6DS");
    let fail: Value =
        serde_json::from_str(&endpoints.call(DEVMAN_ENDPOINT_NAME, "typeinfo/SIMA/NOPE").unwrap()).unwrap();
    assert_eq!(fail["rslt"], "fail");
    assert_eq!(fail["error"], "failTypeNotFound");
    let by_query: Value = serde_json::from_str(
        &endpoints.call(DEVMAN_ENDPOINT_NAME, "typeinfo?bus=SIMA&type=VCNL4040").unwrap(),
    )
    .unwrap();
    assert_eq!(by_query["devinfo"]["name"], "VCNL4040");
    let no_type: Value =
        serde_json::from_str(&endpoints.call(DEVMAN_ENDPOINT_NAME, "typeinfo/SIMA").unwrap()).unwrap();
    assert_eq!(no_type["error"], "failTypeMissing");
    let unknown: Value = serde_json::from_str(&endpoints.call(DEVMAN_ENDPOINT_NAME, "reboot").unwrap()).unwrap();
    assert_eq!(unknown["error"], "failUnknownCmd");
}

#[test]
fn raw_command_reaches_bus_element() {
    let (mut mgr, _clock) = manager(sim_bus_config());
    let endpoints = EndpointList::default();
    orch::sched::SysMod::setup(&mut mgr);
    orch::sched::SysMod::add_rest_api_endpoints(&mut mgr, &mut endpoints.clone());
    let call = |request: &str| -> Value {
        serde_json::from_str(&endpoints.call(DEVMAN_ENDPOINT_NAME, request).unwrap()).unwrap()
    };

    assert_eq!(call("cmdraw?bus=SIMA&addr=0x21&hexWr=08cafe")["rslt"], "ok");
    mgr.service();
    assert!(mgr.last_raw_result().unwrap().ok);
    assert_eq!(call("cmdraw?bus=sima&addr=33&hexWr=08&numToRd=3")["rslt"], "ok");
    assert!(mgr.last_raw_result().unwrap().read.is_empty());
    mgr.service();
    let result = mgr.last_raw_result().unwrap();
    assert_eq!((result.bus_num, result.address), (1, 0x21));
    assert_eq!(result.read, [0xca, 0xfe, 0x00]);

    assert_eq!(call("cmdraw?addr=0x21")["error"], "failBusMissing");
    assert_eq!(call("cmdraw?bus=SIMA")["error"], "failMissingAddr");
    assert_eq!(call("cmdraw?bus=SIMB&addr=0x21")["error"], "failBusNotFound");
    assert_eq!(call("cmdraw?bus=SIMA&addr=0x21&hexWr=zz")["error"], "failInvalidHex");
    assert_eq!(call("cmdraw?bus=SIMA&addr=0x55"), json!({"rslt": "fail"}));
}

#[test]
fn direct_devices_sharing_a_publish_type_are_all_reported() {
    let (mgr, _clock) = manager(json!({"Devices": [
        {"class": "DemoDevice", "name": "imu", "sampleRateMs": 50},
        {"class": "DemoDevice", "name": "imu2", "sampleRateMs": 50}
    ]}));
    mgr.setup();
    mgr.post_setup();

    assert_eq!(mgr.get_device_list_frozen(usize::MAX, true).len(), 2);
    let data: Value = serde_json::from_str(&mgr.get_devices_data_json()).unwrap();
    let demo = data["ACCDEMO"].as_object().unwrap();
    assert_eq!(demo.len(), 2);
    assert!(demo.contains_key("0") && demo.contains_key("1"));
    assert_eq!(BinaryDataMsg::iter(&mgr.get_devices_data_binary()).count(), demo.len());
}

#[test]
fn full_directory_discards_new_bus_devices() {
    let mut config = sim_bus_config();
    config["DevMan"] = json!({"maxDevices": 1});
    let (mgr, clock) = manager(config);
    mgr.setup();
    mgr.service();

    let frozen = mgr.get_device_list_frozen(usize::MAX, false);
    assert_eq!(frozen.len(), 1);
    assert_eq!(frozen[0].device.id(), DeviceId::new(1, 0x20));
    assert!(mgr.get_device_by_id(DeviceId::new(1, 0x21)).is_none());
    assert!(mgr.bus_events().is_empty());

    // The device that did get in keeps tracking its element.
    let simbus = sim_bus(&mgr);
    SimBus::from_bus(simbus.as_ref()).unwrap().set_present(0x20, false);
    clock.advance_ms(100);
    mgr.service();
    assert!(mgr.get_device_list_frozen(usize::MAX, true).is_empty());
    assert_eq!(mgr.get_device_list_frozen(usize::MAX, false).len(), 1);
}

#[test]
fn supervised_manager_offers_json_to_publisher() {
    init_logging();
    let clock = ManualClock::new();
    let log = journal();
    let config = demo_config();
    let mgr = DeviceManager::new(ConfigDoc::new(config.clone()), clock.clone());
    let mut sup = Supervisor::new(
        ConfigDoc::new(config),
        clock.clone(),
        Arc::new(RecordingPlatform::default()),
    );
    sup.add(RecordingModule::new(DEVMAN_PUBLISHER, &log).boxed());
    sup.add(mgr.as_module());
    sup.setup();

    let log = entries(&log);
    let prefix = format!("{}.source {} ", DEVMAN_PUBLISHER, DEVMAN_JSON_TOPIC);
    let routed = log.iter().find(|e| e.starts_with(&prefix)).expect("devjson offered");
    let len: usize = routed[prefix.len()..].parse().unwrap();
    assert_eq!(len, mgr.get_devices_data_json().len());
    assert!(len > 0);
}

#[test]
fn data_source_yields_aggregate_and_hash() {
    let (mgr, clock) = manager(demo_config());
    mgr.setup();
    clock.advance_ms(300);
    mgr.service();

    let json_source = mgr.data_source(false);
    let text = String::from_utf8((json_source.msg_gen)()).unwrap();
    assert!(text.contains("ACCDEMO"));
    assert_eq!((json_source.state_detect)(), mgr.get_devices_hash());

    let bin_source = mgr.data_source(true);
    assert_eq!(BinaryDataMsg::iter(&(bin_source.msg_gen)()).count(), 1);
}

#[test]
fn status_reports_from_second_context_do_not_duplicate() {
    let (mgr, clock) = manager(sim_bus_config());
    mgr.setup();
    let type_idx = mgr.type_catalog().index_by_name("VCNL4040").unwrap();

    let other = mgr.clone();
    let reporter = thread::spawn(move || {
        for _ in 0..200 {
            other.handle_bus_elem_status(1, &[BusAddrStatus::identified(0x20, type_idx)]);
        }
    });
    for _ in 0..50 {
        mgr.service();
        clock.advance_ms(10);
    }
    reporter.join().unwrap();

    let frozen = mgr.get_device_list_frozen(usize::MAX, false);
    let mut ids: Vec<DeviceId> = frozen.iter().map(|e| e.device.id()).collect();
    ids.sort();
    assert_eq!(ids, [DeviceId::new(1, 0x20), DeviceId::new(1, 0x21)]);
}

#[test]
fn shutdown_releases_buses_and_devices() {
    let (mgr, _clock) = manager(sim_bus_config());
    mgr.setup();
    mgr.service();
    mgr.shutdown();
    assert!(mgr.bus_registry().is_empty());
    assert!(mgr.get_device_list_frozen(usize::MAX, false).is_empty());
    mgr.shutdown();
}
