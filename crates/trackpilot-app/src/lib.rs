//! Shared application plumbing for the `trackpilot` command-line shell.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use trackpilot_brain::{Evolvable, GeneticConfig, GeneticPopulation, MlpBrain};
use trackpilot_brain_neuro::{GreedyPolicy, NeuroflowValueNetwork, ValueNetworkConfig};
use trackpilot_core::{
    Episode, EpisodeResult, EvaluatedGenome, Evolution, NullSink, ReplayTrainer,
    STEERING_ACTION_WIDTH, SensorArray, Track, TrackPilotConfig, TrainingSink, TrainingSummary,
};
use trackpilot_storage::{PolicyArtifact, TrackManifest, TrainingLogPipeline, peek_kind};

/// Everything the shell can be configured with, loaded from one JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub simulation: TrackPilotConfig,
    pub genetic: GeneticConfig,
    pub value_network: ValueNetworkConfig,
}

impl Settings {
    /// Read settings from `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.simulation
            .validate()
            .context("invalid simulation config")?;
        self.genetic
            .validate(self.simulation.evolution.population_size)
            .context("invalid genetic config")?;
        self.value_network
            .validate()
            .context("invalid value network config")?;
        Ok(())
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        let simulation = &mut self.simulation;
        if let Some(seed) = overrides.seed {
            simulation.rng_seed = Some(seed);
        }
        if let Some(generations) = overrides.generations {
            simulation.evolution.generations = generations;
        }
        if let Some(population) = overrides.population {
            simulation.evolution.population_size = population;
        }
        if let Some(episodes) = overrides.episodes {
            simulation.replay.episodes = episodes;
        }
        if let Some(step_budget) = overrides.step_budget {
            simulation.termination.step_budget = step_budget;
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub seed: Option<u64>,
    pub generations: Option<u32>,
    pub population: Option<usize>,
    pub episodes: Option<u32>,
    pub step_budget: Option<u32>,
}

/// Load the track from a manifest, or use the open arena when explicitly allowed.
pub fn resolve_track(manifest: Option<&Path>, allow_default: bool) -> Result<Track> {
    match manifest {
        Some(path) => TrackManifest::load_track(path)
            .with_context(|| format!("failed to load track manifest {}", path.display())),
        None if allow_default => {
            warn!("no track manifest given; driving the built-in open arena");
            Ok(Track::open_arena())
        }
        None => bail!("no track given; pass --track <manifest.json> or --default-track"),
    }
}

fn open_sink(log: Option<&Path>) -> Result<Box<dyn TrainingSink>> {
    let sink: Box<dyn TrainingSink> = match log {
        Some(path) => Box::new(
            TrainingLogPipeline::create(path)
                .with_context(|| format!("failed to open training log {}", path.display()))?,
        ),
        None => Box::new(NullSink),
    };
    Ok(sink)
}

/// Outcome of `trackpilot evolve`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvolveSummary {
    pub generations_run: u32,
    pub best_fitness: Option<f32>,
    pub goal_reached: bool,
    pub fitness_history: Vec<f32>,
    pub artifact: Option<PathBuf>,
}

/// Evolve steering brains on `track` and save the champion to `output`.
pub fn run_evolve(
    settings: &Settings,
    track: &Track,
    output: &Path,
    log: Option<&Path>,
) -> Result<EvolveSummary> {
    settings.validate()?;
    let simulation = &settings.simulation;
    let observation_len = simulation.observation_len();
    let mut population = GeneticPopulation::new(
        settings.genetic.clone(),
        simulation.evolution.population_size,
        observation_len,
        simulation.seeded_rng(),
    )
    .context("failed to seed population")?;
    let mut evolution = Evolution::new(simulation)?;
    let mut sink = open_sink(log)?;

    info!(
        population = simulation.evolution.population_size,
        generations = simulation.evolution.generations,
        observation_len,
        "starting evolution",
    );
    let outcome = evolution
        .run(&mut population, track, sink.as_mut())
        .context("evolution failed")?;
    drop(sink);

    let artifact = match outcome.best {
        Some(best) => {
            let fitness = best.fitness();
            let brain = best.into_brain();
            let artifact =
                PolicyArtifact::new(brain.kind().as_str(), fitness, observation_len, brain);
            artifact
                .save(output)
                .with_context(|| format!("failed to save artifact {}", output.display()))?;
            Some(output.to_path_buf())
        }
        None => {
            warn!("evolution produced no scored genome; nothing saved");
            None
        }
    };

    Ok(EvolveSummary {
        generations_run: outcome.generations_run,
        best_fitness: outcome.best_fitness,
        goal_reached: outcome.goal_reached,
        fitness_history: outcome.fitness_history,
        artifact,
    })
}

/// Train a value network on `track` with experience replay and save it to `output`.
pub fn run_train(
    settings: &Settings,
    track: &Track,
    output: &Path,
    log: Option<&Path>,
) -> Result<TrainingSummary> {
    settings.validate()?;
    let simulation = &settings.simulation;
    let observation_len = simulation.observation_len();
    let mut rng = simulation.seeded_rng();
    let online =
        NeuroflowValueNetwork::new(settings.value_network.clone(), observation_len, &mut rng)
            .context("failed to build online network")?;
    let target =
        NeuroflowValueNetwork::new(settings.value_network.clone(), observation_len, &mut rng)
            .context("failed to build target network")?;
    let mut trainer = ReplayTrainer::new(simulation, online, target)?;
    let mut sink = open_sink(log)?;

    info!(
        episodes = simulation.replay.episodes,
        observation_len, "starting replay training",
    );
    let summary = trainer
        .train(track, &mut rng, simulation.replay.episodes, sink.as_mut())
        .context("training failed")?;
    drop(sink);

    let artifact = PolicyArtifact::new(
        NeuroflowValueNetwork::KIND.as_str(),
        summary.best_reward,
        observation_len,
        trainer.into_online(),
    );
    artifact
        .save(output)
        .with_context(|| format!("failed to save artifact {}", output.display()))?;
    Ok(summary)
}

/// Drive one greedy episode with a saved policy.
pub fn run_drive(settings: &Settings, track: &Track, artifact: &Path) -> Result<EpisodeResult> {
    settings.simulation.validate()?;
    let simulation = &settings.simulation;
    let observation_len = simulation.observation_len();
    let sensors = SensorArray::new(&simulation.sensors);
    let episode = Episode::spawn(track, &simulation.control, &simulation.termination)?;

    let kind = peek_kind(artifact)
        .with_context(|| format!("failed to read artifact {}", artifact.display()))?;
    let result = if kind == MlpBrain::KIND.as_str() {
        let loaded = PolicyArtifact::<MlpBrain>::load(artifact, &kind)?;
        let mut brain = loaded.payload;
        brain
            .validate(observation_len, STEERING_ACTION_WIDTH)
            .context("artifact does not match the configured sensor layout")?;
        episode.run_steering(track, &sensors, &mut brain)?
    } else if kind == NeuroflowValueNetwork::KIND.as_str() {
        let loaded = PolicyArtifact::<NeuroflowValueNetwork>::load(artifact, &kind)?;
        if loaded.payload.observation_len() != observation_len {
            bail!(
                "artifact expects {} observation values but the sensors produce {observation_len}",
                loaded.payload.observation_len()
            );
        }
        let mut policy = GreedyPolicy::new(loaded.payload);
        episode.run_discrete(track, &sensors, &mut policy)?
    } else {
        bail!("unknown policy kind `{kind}` in {}", artifact.display());
    };

    info!(
        cause = result.terminal_cause.as_str(),
        steps = result.steps_survived,
        min_distance = ?result.min_distance_to_goal,
        "drive complete",
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let mut settings = Settings::default();
        settings.apply(&Overrides {
            seed: Some(7),
            generations: Some(3),
            population: Some(12),
            episodes: None,
            step_budget: Some(200),
        });
        assert_eq!(settings.simulation.rng_seed, Some(7));
        assert_eq!(settings.simulation.evolution.generations, 3);
        assert_eq!(settings.simulation.evolution.population_size, 12);
        assert_eq!(settings.simulation.replay.episodes, 500);
        assert_eq!(settings.simulation.termination.step_budget, 200);
    }

    #[test]
    fn partial_config_files_keep_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"simulation": {"termination": {"step_budget": 300}}, "genetic": {"elitism": 4}}"#,
        )
        .expect("write");
        let settings = Settings::load(Some(&path)).expect("settings");
        assert_eq!(settings.simulation.termination.step_budget, 300);
        assert_eq!(settings.simulation.termination.capture_radius, 30.0);
        assert_eq!(settings.genetic.elitism, 4);
        assert_eq!(settings.value_network, ValueNetworkConfig::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_track_requires_explicit_default() {
        assert!(resolve_track(None, false).is_err());
        let arena = resolve_track(None, true).expect("arena");
        assert_eq!((arena.width(), arena.height()), (1000, 800));
    }
}
