#![cfg(feature = "rtrb")]

use std::thread;
use std::time::Duration;

use stepclock::driver::{result_code, INVALID_TEMPO_EXIT_CODE};
use stepclock::host::{EngineError, EngineStage, OfflineEngine};
use stepclock::io::{write_note_event, MidiBuffer, NOTE_OFF, NOTE_ON};
use stepclock::timing::TempoError;
use stepclock::{run_driver, DriverConfig, DriverError, StepTick, StepTrigger, StopSignal, TimingMode};

/// One note-on per step; the velocity carries the low bits of the step index
struct Click;

impl StepTrigger for Click {
    fn on_step(&mut self, tick: StepTick, out: &mut MidiBuffer<'_>) {
        let velocity = (tick.index % 127) as u8 + 1;
        write_note_event(out, tick.offset, NOTE_ON, 1, 60, velocity).unwrap();
    }
}

/// Note-on and note-off at every step
struct OnOff;

impl StepTrigger for OnOff {
    fn on_step(&mut self, tick: StepTick, out: &mut MidiBuffer<'_>) {
        write_note_event(out, tick.offset, NOTE_ON, 1, 60, 100).unwrap();
        write_note_event(out, tick.offset, NOTE_OFF, 1, 60, 0).unwrap();
    }
}

fn rendered(sample_rate: u32, block_size: u32, blocks: u64, stop: &StopSignal) -> OfflineEngine {
    OfflineEngine::new(sample_rate, block_size)
        .max_blocks(blocks)
        .on_finished(stop.clone())
}

fn note_frames(engine: &mut OfflineEngine) -> Vec<u64> {
    engine
        .drain_events()
        .iter()
        .filter(|e| e.event.bytes()[0] == 0x90)
        .map(|e| e.frame)
        .collect()
}

#[test]
fn renders_steps_after_burn_in() {
    let stop = StopSignal::new();
    let mut engine = rendered(48_000, 256, 200, &stop);
    let config = DriverConfig::new(120, 4);

    let result = run_driver(&mut engine, &config, Click, &stop);
    assert_eq!(result, Ok(()));
    assert_eq!(result_code(&result), 0);
    assert_eq!(engine.frames_rendered(), 51_200);
    assert_eq!(engine.failed_blocks(), 0);
    assert_eq!(engine.xruns(), 0);

    // Warm-up ends with the block starting at 8192; 6000 frames per step
    let expected: Vec<u64> = (2..=8).map(|k| k * 6000).collect();
    assert_eq!(note_frames(&mut engine), expected);
    assert_eq!(
        engine.history(),
        &[
            EngineStage::RegisterProcess,
            EngineStage::RegisterXrun,
            EngineStage::Activate,
            EngineStage::Deactivate
        ]
    );
}

#[test]
fn step_indices_count_from_first_dispatch() {
    let stop = StopSignal::new();
    let mut engine = rendered(48_000, 64, 300, &stop);
    let config = DriverConfig::new(240, 4).burn_in_frames(0);

    run_driver(&mut engine, &config, Click, &stop).unwrap();

    let velocities: Vec<u8> = engine
        .drain_events()
        .iter()
        .map(|e| e.event.bytes()[2])
        .collect();
    // 3000 frames per step over 19_200 frames
    assert_eq!(velocities, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn exact_timing_holds_over_long_runs() {
    let stop = StopSignal::new();
    let mut engine = rendered(44_100, 128, 3000, &stop);
    let config = DriverConfig::new(120, 24)
        .burn_in_frames(0)
        .timing(TimingMode::Exact);

    run_driver(&mut engine, &config, Click, &stop).unwrap();

    // 918.75 frames per step
    let total = engine.frames_rendered();
    let expected: Vec<u64> = (1u64..)
        .map(|k| (k * 3675 + 3) / 4)
        .take_while(|&f| f < total)
        .collect();
    assert_eq!(note_frames(&mut engine), expected);
}

#[test]
fn overruns_are_reported_and_the_run_continues() {
    let stop = StopSignal::new();
    let mut engine = rendered(48_000, 64, 300, &stop).capture_capacity(1);
    let config = DriverConfig::new(240, 4).burn_in_frames(0);

    let result = run_driver(&mut engine, &config, OnOff, &stop);
    assert_eq!(result, Ok(()));
    assert_eq!(result_code(&result), 0);

    // Six steps of two events each into a one-slot capture ring: every
    // block holding a step loses at least one event
    assert_eq!(engine.xruns(), 6);
    assert_eq!(engine.frames_rendered(), 19_200);
    assert_eq!(engine.failed_blocks(), 0);

    let kept = engine.drain_events();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].frame, 3000);
}

#[test]
fn stop_from_another_thread() {
    let stop = StopSignal::new();
    let mut engine = OfflineEngine::new(48_000, 256).paced(true);
    let config = DriverConfig::new(120, 4);

    let remote = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request_stop();
    });

    assert_eq!(run_driver(&mut engine, &config, Click, &stop), Ok(()));
    stopper.join().unwrap();
    assert!(engine.frames_rendered() > 0);
    assert!(!engine.is_active());
}

#[test]
fn registration_failure_returns_code_1() {
    let stop = StopSignal::new();
    let mut engine = OfflineEngine::new(48_000, 256).fail_at(EngineStage::RegisterXrun);

    let result = run_driver(&mut engine, &DriverConfig::new(120, 4), Click, &stop);
    assert_eq!(
        result,
        Err(DriverError::CallbackRegistration(EngineError::Injected(
            EngineStage::RegisterXrun
        )))
    );
    assert_eq!(result_code(&result), 1);
    assert_eq!(
        engine.history(),
        &[EngineStage::RegisterProcess, EngineStage::RegisterXrun]
    );
}

#[test]
fn activate_failure_returns_code_2_without_deactivating() {
    let stop = StopSignal::new();
    let mut engine = OfflineEngine::new(48_000, 256).fail_at(EngineStage::Activate);

    let result = run_driver(&mut engine, &DriverConfig::new(120, 4), Click, &stop);
    assert_eq!(result_code(&result), 2);
    assert!(!engine.history().contains(&EngineStage::Deactivate));
    assert!(!engine.is_active());
    assert_eq!(engine.frames_rendered(), 0);
}

#[test]
fn deactivate_failure_returns_code_3() {
    let stop = StopSignal::new();
    let mut engine = rendered(48_000, 256, 10, &stop).fail_at(EngineStage::Deactivate);

    let result = run_driver(&mut engine, &DriverConfig::new(120, 4), Click, &stop);
    assert!(matches!(result, Err(DriverError::Deactivate(_))));
    assert_eq!(result_code(&result), 3);
}

#[test]
fn invalid_tempo_never_touches_engine() {
    let stop = StopSignal::new();
    stop.request_stop();

    let mut engine = OfflineEngine::new(0, 256);
    let result = run_driver(&mut engine, &DriverConfig::new(120, 4), Click, &stop);
    assert_eq!(
        result,
        Err(DriverError::InvalidTempo(TempoError::ZeroSampleRate))
    );
    assert_eq!(result_code(&result), INVALID_TEMPO_EXIT_CODE);
    assert!(engine.history().is_empty());

    let mut engine = OfflineEngine::new(48_000, 256);
    let result = run_driver(&mut engine, &DriverConfig::new(120, 0), Click, &stop);
    assert_eq!(result, Err(DriverError::InvalidTempo(TempoError::ZeroPpq)));
}
