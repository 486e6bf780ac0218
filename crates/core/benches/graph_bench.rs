// Benchmarks for bus graph mutation and RTPC fan-out
//
// Run with: cargo bench --bench graph_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tenuto_core::domain::*;

/// Mixer that hands out handles and ignores everything else
#[derive(Default)]
struct NullMixer {
    next: AtomicU64,
}

impl NullMixer {
    fn handle(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Mixer for NullMixer {
    fn open_root_bus(&self, _channels: u16) -> Result<BusHandle, EngineError> {
        Ok(BusHandle::from_raw(self.handle()))
    }
    fn open_sub_bus(&self, _parent: BusHandle, _channels: u16) -> Result<BusHandle, EngineError> {
        Ok(BusHandle::from_raw(self.handle()))
    }
    fn annex_bus(&self, _bus: BusHandle, _parent: BusHandle) -> Result<(), EngineError> {
        Ok(())
    }
    fn close_bus(&self, _bus: BusHandle) {}
    fn set_bus_volume(&self, _bus: BusHandle, _volume: f32) {}
    fn set_bus_filter(&self, _bus: BusHandle, _slot: usize, _filter: Option<SharedFilter>) {}
    fn set_bus_filter_param(&self, _bus: BusHandle, _slot: usize, _param: usize, _value: f32) {}
    fn bus_filter_param(&self, _bus: BusHandle, _slot: usize, _param: usize) -> Option<f32> {
        None
    }
    fn set_bus_visualization(&self, _bus: BusHandle, _enabled: bool) {}
    fn bus_peak_volumes(&self, _bus: BusHandle) -> Vec<f32> {
        Vec::new()
    }
    fn load_asset(&self, _asset: &AssetId, _data: AssetData) -> Result<(), EngineError> {
        Ok(())
    }
    fn unload_asset(&self, _asset: &AssetId) {}
    fn play(&self, _asset: &AssetId, _request: &PlayRequest) -> Result<VoiceHandle, EngineError> {
        Ok(VoiceHandle::from_raw(self.handle()))
    }
    fn stop_voice(&self, _voice: VoiceHandle) {}
    fn stop_asset(&self, _asset: &AssetId) {}
    fn stop_all(&self) {}
    fn is_valid_voice(&self, _voice: VoiceHandle) -> bool {
        true
    }
    fn set_voice_paused(&self, _voice: VoiceHandle, _paused: bool) {}
    fn set_voice_volume(&self, voice: VoiceHandle, volume: f32) {
        black_box((voice, volume));
    }
    fn set_voice_looping(&self, _voice: VoiceHandle, _looping: bool) {}
    fn set_voice_speed(&self, _voice: VoiceHandle, _speed: f32) {}
    fn seek_voice(&self, _voice: VoiceHandle, _seconds: f64) {}
    fn set_voice_position(&self, _voice: VoiceHandle, _position: Vec3) {}
    fn set_voice_filter(&self, _voice: VoiceHandle, _slot: usize, _filter: Option<SharedFilter>) {}
    fn set_voice_filter_param(&self, _voice: VoiceHandle, _slot: usize, _param: usize, _value: f32) {}
    fn set_global_volume(&self, _volume: f32) {}
    fn global_volume(&self) -> f32 {
        1.0
    }
    fn set_pause_all(&self, _paused: bool) {}
    fn set_listener(&self, _listener: Listener) {}
    fn update_3d(&self) {}
}

fn chained_layout(buses: usize) -> BusLayoutData {
    let mut layout = BusLayoutData::default();
    layout.buses.push(BusData::named(MASTER_BUS));
    for i in 1..buses {
        let mut bus = BusData::named(&format!("Bus{}", i));
        bus.output_bus_name = if i == 1 {
            MASTER_BUS.to_string()
        } else {
            format!("Bus{}", i - 1)
        };
        bus.volume = -3.0;
        layout.buses.push(bus);
    }
    layout
}

fn bench_load_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_layout");
    let catalog = FilterCatalog::with_builtins();

    for buses in [4usize, 16, 64] {
        let layout = chained_layout(buses);
        group.bench_with_input(BenchmarkId::from_parameter(buses), &layout, |b, layout| {
            let mut graph = BusGraph::new(Arc::new(NullMixer::default()));
            b.iter(|| {
                graph.load_layout(black_box(layout), &catalog).ok();
                graph.activate_all().ok();
            });
        });
    }

    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    let catalog = FilterCatalog::with_builtins();
    let mut graph = BusGraph::new(Arc::new(NullMixer::default()));
    if graph.load_layout(&chained_layout(32), &catalog).is_err() {
        return;
    }

    c.bench_function("reorder_bus_32", |b| {
        b.iter(|| {
            black_box(graph.reorder_bus(1, 31).ok());
            black_box(graph.reorder_bus(31, 1).ok());
        });
    });
}

fn bench_shared_rtpc_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_volume_rtpc");
    let asset = AssetId::new("loop.wav");
    let rtpc = RtpcDef::Asset {
        asset: asset.clone(),
        param: AssetRtpc::Volume,
        per_object: false,
    };

    for voices in [16u64, 256, 1024] {
        let mut engine = AudioEngine::new(Arc::new(NullMixer::default()), FilterCatalog::with_builtins());
        engine.reset_layout().ok();
        engine
            .register_asset(asset.clone(), AssetData::new(vec![0.0; 16], 1, 44100))
            .ok();
        for i in 0..voices {
            engine
                .activate_trigger(ObjectId::new(i % 32), &TriggerDef::start(asset.clone()))
                .ok();
        }

        group.bench_with_input(BenchmarkId::from_parameter(voices), &voices, |b, _| {
            b.iter(|| {
                engine.set_rtpc(ObjectId::new(0), &rtpc, black_box(0.5)).ok();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_load_layout, bench_reorder, bench_shared_rtpc_fan_out);
criterion_main!(benches);
