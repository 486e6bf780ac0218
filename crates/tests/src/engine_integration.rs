//! Integration tests for the engine running on the software mixer
//!
//! These drive requests through `AudioEngine` and `AudioService` and check
//! what actually comes out of `SoftMixer::render`.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tenuto_core::domain::{
    AssetData, AssetId, AssetRtpc, AudioEngine, BusData, BusLayoutData, ClipperMode, EngineConfig,
    FilterCatalog, FilterData, LayoutLibrary, Notification, ObjectId, Request, RtpcDef,
    TriggerDef, TriggerParams, GAIN_FILTER, MASTER_BUS,
};
use tenuto_infra::{AudioService, SoftMixer};

const EPS: f32 = 1e-4;

fn test_config() -> EngineConfig {
    EngineConfig {
        clipper: ClipperMode::Hard,
        post_clip_scaler: 1.0,
        ..EngineConfig::default()
    }
}

fn engine() -> (Arc<SoftMixer>, AudioEngine) {
    let mixer = Arc::new(SoftMixer::new(&test_config()));
    let mut engine = AudioEngine::new(mixer.clone(), FilterCatalog::with_builtins());
    engine.reset_layout().unwrap();
    (mixer, engine)
}

fn constant_asset(engine: &mut AudioEngine, name: &str, value: f32, frames: usize) -> AssetId {
    let asset = AssetId::new(name);
    engine
        .register_asset(asset.clone(), AssetData::new(vec![value; frames], 1, 44100))
        .unwrap();
    asset
}

fn render(mixer: &SoftMixer, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames * 2];
    mixer.render(&mut out);
    out
}

fn all_near(samples: &[f32], expected: f32) -> bool {
    samples.iter().all(|s| (s - expected).abs() < EPS)
}

fn start_on(asset: &AssetId, bus: &str) -> TriggerDef {
    TriggerDef::new(
        asset.clone(),
        TriggerParams {
            bus: bus.to_string(),
            looping: true,
            ..TriggerParams::default()
        },
    )
}

fn assert_all_succeeded(notifications: &[Notification]) {
    for notification in notifications {
        assert!(notification.success(), "{:?} failed", notification);
    }
}

// ============================================================================
// ROUTING
// ============================================================================

#[test]
fn test_voice_renders_through_bus_chain() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Music").unwrap();
    assert_all_succeeded(&engine.handle(Request::SetVolumeLinear {
        bus: MASTER_BUS.to_string(),
        volume: 0.5,
    }));
    assert_all_succeeded(&engine.handle(Request::SetVolumeLinear {
        bus: "Music".to_string(),
        volume: 0.5,
    }));

    let asset = constant_asset(&mut engine, "music/theme.wav", 1.0, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, "Music"))
        .unwrap();

    assert!(all_near(&render(&mixer, 32), 0.25));
}

#[test]
fn test_muted_bus_silences_its_subtree() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Sfx").unwrap();
    engine.add_bus("Footsteps").unwrap();
    assert_all_succeeded(&engine.handle(Request::SetOutput {
        bus: "Footsteps".to_string(),
        output: "Sfx".to_string(),
    }));

    let asset = constant_asset(&mut engine, "sfx/step.wav", 0.5, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, "Footsteps"))
        .unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));

    assert_all_succeeded(&engine.handle(Request::SetMuted {
        bus: "Sfx".to_string(),
        muted: true,
    }));
    assert!(all_near(&render(&mixer, 16), 0.0));

    assert_all_succeeded(&engine.handle(Request::SetMuted {
        bus: "Sfx".to_string(),
        muted: false,
    }));
    assert!(all_near(&render(&mixer, 16), 0.5));
}

#[test]
fn test_bus_filter_shapes_output() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Voice").unwrap();
    assert_all_succeeded(&engine.handle(Request::SetFilter {
        bus: "Voice".to_string(),
        slot: 0,
        filter: Some(GAIN_FILTER.to_string()),
    }));
    assert_all_succeeded(&engine.handle(Request::SetFilterParam {
        bus: "Voice".to_string(),
        slot: 0,
        param: "Gain".to_string(),
        value: 0.5,
    }));

    let asset = constant_asset(&mut engine, "vo/line.wav", 0.8, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, "Voice"))
        .unwrap();

    assert!(all_near(&render(&mixer, 16), 0.4));
}

#[test]
fn test_peak_volumes_follow_visualization() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Music").unwrap();

    let asset = constant_asset(&mut engine, "music/loop.wav", 0.3, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, "Music"))
        .unwrap();

    assert_all_succeeded(&engine.handle(Request::SetVisualization { enabled: true }));
    render(&mixer, 16);

    let peaks = engine.peak_volumes("Music").unwrap();
    assert_eq!(peaks.len(), 2);
    assert!(all_near(&peaks, 0.3));
}

// ============================================================================
// LAYOUTS
// ============================================================================

#[test]
fn test_rejected_layout_keeps_a_live_master() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Old").unwrap();

    let mut broken = BusData::named("Sfx");
    broken.filter_block.filters[0] = FilterData {
        name: "No such filter".to_string(),
        ..FilterData::default()
    };
    let layout = BusLayoutData {
        buses: vec![BusData::named(MASTER_BUS), broken],
    };

    assert!(engine.load_layout(&layout).is_err());
    assert_eq!(engine.graph().bus_names(), vec![MASTER_BUS.to_string()]);

    let asset = constant_asset(&mut engine, "ui/click.wav", 0.5, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, MASTER_BUS))
        .unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));
}

#[tokio::test]
async fn test_layout_library_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let library = LayoutLibrary::new(temp_dir.path().to_path_buf());

    let (_, mut original) = engine();
    original.add_bus("Music").unwrap();
    original.add_bus("Ambience").unwrap();
    assert_all_succeeded(&original.handle(Request::SetVolumeDb {
        bus: "Ambience".to_string(),
        volume_db: -6.0,
    }));
    library.save_layout("level1", &original.gather_layout()).await.unwrap();
    assert_eq!(library.list_layouts().await.unwrap(), vec!["level1".to_string()]);

    let (_, mut restored) = engine();
    restored
        .load_layout(&library.load_layout("level1").await.unwrap())
        .unwrap();

    let layout = restored.gather_layout();
    let names: Vec<&str> = layout.buses.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec![MASTER_BUS, "Music", "Ambience"]);
    assert!((layout.buses[2].volume + 6.0).abs() < EPS);
}

// ============================================================================
// VOICES AND RTPC
// ============================================================================

#[test]
fn test_shared_and_per_object_volume_rtpc() {
    let (mixer, mut engine) = engine();
    let asset = constant_asset(&mut engine, "amb/wind.wav", 0.5, 256);
    let first = ObjectId::new(1);
    let second = ObjectId::new(2);
    engine.activate_trigger(first, &start_on(&asset, MASTER_BUS)).unwrap();
    engine.activate_trigger(second, &start_on(&asset, MASTER_BUS)).unwrap();
    assert!(all_near(&render(&mixer, 16), 1.0));

    let shared = RtpcDef::Asset {
        asset: asset.clone(),
        param: AssetRtpc::Volume,
        per_object: false,
    };
    engine.set_rtpc(first, &shared, 0.5).unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));

    let own = RtpcDef::Asset {
        asset,
        param: AssetRtpc::Volume,
        per_object: true,
    };
    engine.set_rtpc(first, &own, 0.0).unwrap();
    assert!(all_near(&render(&mixer, 16), 0.25));
}

#[test]
fn test_finished_voices_are_swept() {
    let (mixer, mut engine) = engine();
    let asset = constant_asset(&mut engine, "sfx/blip.wav", 0.5, 8);
    let object = ObjectId::new(7);
    engine
        .activate_trigger(object, &TriggerDef::start(asset.clone()))
        .unwrap();
    assert_eq!(engine.active_voice_count(object), 1);

    render(&mixer, 32);
    assert_eq!(engine.active_voice_count(object), 0);
}

#[test]
fn test_stop_event_silences_one_voice() {
    let (mixer, mut engine) = engine();
    let asset = constant_asset(&mut engine, "sfx/alarm.wav", 0.25, 256);
    let object = ObjectId::new(3);
    let first = engine.activate_trigger(object, &start_on(&asset, MASTER_BUS)).unwrap();
    engine.activate_trigger(object, &start_on(&asset, MASTER_BUS)).unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));

    engine.stop_event(object, first).unwrap();
    assert!(all_near(&render(&mixer, 16), 0.25));
    assert_eq!(engine.active_voice_count(object), 1);
}

#[test]
fn test_mute_all_and_focus() {
    let (mixer, mut engine) = engine();
    let asset = constant_asset(&mut engine, "music/menu.wav", 0.5, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, MASTER_BUS))
        .unwrap();

    engine.mute_all();
    assert!(all_near(&render(&mixer, 16), 0.0));
    engine.unmute_all();
    assert!(all_near(&render(&mixer, 16), 0.5));

    engine.lose_focus();
    assert!(all_near(&render(&mixer, 16), 0.0));
    engine.get_focus();
    assert!(all_near(&render(&mixer, 16), 0.5));
}

#[test]
fn test_destroyed_bus_voices_fall_silent() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Temp").unwrap();
    let asset = constant_asset(&mut engine, "sfx/hum.wav", 0.5, 256);
    engine
        .activate_trigger(ObjectId::new(1), &start_on(&asset, "Temp"))
        .unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));

    assert_all_succeeded(&engine.handle(Request::DestroyBus {
        name: "Temp".to_string(),
    }));
    assert!(all_near(&render(&mixer, 16), 0.0));

    engine.update();
    assert_eq!(engine.active_voice_count(ObjectId::new(1)), 0);
    assert_eq!(mixer.voice_count(), 0);
}

#[test]
fn test_mono_rebuild_sweeps_voices() {
    let (mixer, mut engine) = engine();
    let asset = constant_asset(&mut engine, "music/drone.wav", 0.5, 256);
    let object = ObjectId::new(1);
    engine.activate_trigger(object, &start_on(&asset, MASTER_BUS)).unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));

    assert_all_succeeded(&engine.handle(Request::SetMono {
        bus: MASTER_BUS.to_string(),
        mono: true,
    }));
    engine.update();
    assert_eq!(engine.active_voice_count(object), 0);
    assert_eq!(mixer.voice_count(), 0);

    // The rebuilt graph plays new voices
    engine.activate_trigger(object, &start_on(&asset, MASTER_BUS)).unwrap();
    assert!(all_near(&render(&mixer, 16), 0.5));
}

#[test]
fn test_layout_reload_sweeps_voices() {
    let (mixer, mut engine) = engine();
    engine.add_bus("Music").unwrap();
    let asset = constant_asset(&mut engine, "music/theme.wav", 0.5, 256);
    let object = ObjectId::new(1);
    engine.activate_trigger(object, &start_on(&asset, "Music")).unwrap();

    let layout = engine.gather_layout();
    engine.load_layout(&layout).unwrap();
    engine.update();

    assert_eq!(engine.active_voice_count(object), 0);
    assert_eq!(mixer.voice_count(), 0);
}

// ============================================================================
// SERVICE
// ============================================================================

#[tokio::test]
async fn test_service_applies_requests_before_replying() {
    let mixer = Arc::new(SoftMixer::new(&test_config()));
    let engine = AudioEngine::new(mixer.clone(), FilterCatalog::with_builtins());
    let service = AudioService::spawn(engine, Duration::from_millis(5)).unwrap();
    let handle = service.handle();

    let asset = AssetId::new("music/title.wav");
    let requests = [
        Request::ResetLayout,
        Request::AddBus {
            name: "Music".to_string(),
        },
        Request::RegisterAsset {
            asset: asset.clone(),
            data: AssetData::new(vec![0.5; 4096], 1, 44100),
        },
        Request::ActivateTrigger {
            object: ObjectId::new(1),
            trigger: start_on(&asset, "Music"),
        },
    ];
    for request in requests {
        assert_all_succeeded(&handle.try_execute(request).await.unwrap());
    }
    assert!(all_near(&render(&mixer, 16), 0.5));

    assert_all_succeeded(&handle.try_execute(Request::StopAllSounds).await.unwrap());
    assert!(all_near(&render(&mixer, 16), 0.0));

    service.shutdown();
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_hard_clipped_output_stays_in_range(
        volumes in prop::collection::vec(0.0f32..4.0, 1..6),
        value in -1.0f32..1.0,
    ) {
        let (mixer, mut engine) = engine();
        let asset = constant_asset(&mut engine, "noise.wav", value, 128);
        for (i, volume) in volumes.iter().enumerate() {
            let name = format!("Bus{}", i);
            engine.add_bus(&name).unwrap();
            engine.handle(Request::SetVolumeLinear { bus: name.clone(), volume: *volume });
            engine.activate_trigger(ObjectId::new(i as u64), &start_on(&asset, &name)).unwrap();
        }

        let out = render(&mixer, 32);
        prop_assert!(out.iter().all(|s| s.abs() <= 1.0));
    }
}
