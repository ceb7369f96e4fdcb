use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::time::Duration;
use trackpilot_core::{
    EvaluatedGenome, Generation, GenerationRunner, GenomeId, Position, STATE_FEATURES,
    SimulationError, StartPose, SteeringPolicy, Track, TrackPilotConfig,
};

/// Steers towards the longest free ray, so lanes survive long enough to stress the tick loop.
struct RayFollower {
    gain: f32,
}

impl SteeringPolicy for RayFollower {
    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, SimulationError> {
        let rays = &observation[STATE_FEATURES..];
        let centre = (rays.len() as f32 - 1.0) * 0.5;
        let best = rays
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(centre, |(idx, _)| idx as f32);
        Ok(vec![(centre - best) * self.gain, 1.0])
    }
}

struct BenchGenome {
    id: GenomeId,
    policy: RayFollower,
    fitness: Option<f32>,
}

impl EvaluatedGenome for BenchGenome {
    fn id(&self) -> GenomeId {
        self.id
    }

    fn policy_mut(&mut self) -> &mut dyn SteeringPolicy {
        &mut self.policy
    }

    fn set_fitness(&mut self, fitness: f32) {
        self.fitness = Some(fitness);
    }

    fn fitness(&self) -> Option<f32> {
        self.fitness
    }
}

fn ring_track() -> Track {
    let mut track = Track::unpainted(
        1000,
        800,
        StartPose::new(150.0, 400.0, 90.0),
        Some(Position::new(850.0, 400.0)),
    )
    .expect("track");
    let ring: Vec<Position> = (0..=72)
        .map(|step| {
            let angle = (step as f32 * 5.0).to_radians();
            Position::new(500.0 - 350.0 * angle.cos(), 400.0 - 300.0 * angle.sin())
        })
        .collect();
    track.paint_stroke(&ring, 40.0);
    track
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

fn bench_generations(c: &mut Criterion) {
    let mut group = c.benchmark_group("generation");
    group.sample_size(env_or("TP_BENCH_SAMPLES", 20_usize).max(10));
    group.warm_up_time(Duration::from_secs(env_or("TP_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("TP_BENCH_MEASURE_SECS", 8)));
    let budget: u32 = env_or("TP_BENCH_STEPS", 500_u32).max(1);
    let populations: Vec<usize> = std::env::var("TP_BENCH_POPULATIONS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![50_usize, 200, 1000]);

    let track = ring_track();
    let mut config = TrackPilotConfig::default();
    config.termination.step_budget = budget;
    config.rng_seed = Some(0xBEEF);
    let runner = GenerationRunner::new(&config).expect("runner");

    for &population in &populations {
        group.bench_function(format!("budget{budget}_population{population}"), |b| {
            b.iter_batched(
                || {
                    (0..population)
                        .map(|idx| BenchGenome {
                            id: GenomeId(idx as u64),
                            policy: RayFollower {
                                gain: 0.2 + (idx % 7) as f32 * 0.05,
                            },
                            fitness: None,
                        })
                        .collect::<Vec<_>>()
                },
                |mut genomes| {
                    runner
                        .evaluate(Generation(0), &track, &mut genomes)
                        .expect("generation")
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generations);
criterion_main!(benches);
