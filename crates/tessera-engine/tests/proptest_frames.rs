//! Property tests for frame timing.

use proptest::prelude::*;
use tessera_engine::prelude::*;

#[derive(Debug, Clone)]
enum Drive {
    Step,
    StepAt(f64),
}

fn drive_strategy() -> impl Strategy<Value = Drive> {
    prop_oneof![
        Just(Drive::Step),
        (-500.0..5_000.0f64).prop_map(Drive::StepAt),
    ]
}

proptest! {
    #[test]
    fn world_time_never_decreases_and_deltas_are_clamped(
        drives in prop::collection::vec(drive_strategy(), 1..100),
    ) {
        let config = EngineConfig::default().headless();
        let max_frame_ms = config.max_frame_ms;
        let mut frames = FrameLoop::new(World::new(), config);

        let mut previous = 0.0;
        for (n, drive) in drives.into_iter().enumerate() {
            let report = match drive {
                Drive::Step => frames.step(),
                Drive::StepAt(at) => frames.step_at(at),
            };
            prop_assert!(report.time >= previous);
            prop_assert!(report.delta_time >= 0.0);
            prop_assert!(report.delta_time <= max_frame_ms + 1e-6);
            prop_assert_eq!(frames.frame(), n as u64 + 1);
            previous = report.time;
        }
    }

    #[test]
    fn fixed_rate_time_is_frames_times_frame_ms(count in 1u64..2_000) {
        let config = EngineConfig { frame_ms: 8.0, ..EngineConfig::default() };
        let mut frames = FrameLoop::new(World::new(), config);
        frames.run_frames(count);
        prop_assert_eq!(frames.world().time(), count as f64 * 8.0);
        prop_assert_eq!(frames.world().tick_count(), count);
    }
}
