use crate::{ChangeSource, CycleError, CycleState};
use media_io::{
    build_slideshow, clear_folder, normalize_folder, EncodeSettings, Encoder, ImageFilter,
    Resolution, SlideshowVideo,
};
use playback::{DefaultImage, PlaybackController, PlaybackHandle};
use settings::FrameConfig;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Everything needed to turn an images folder into the slideshow video.
#[derive(Debug, Clone)]
pub struct RebuildPlan {
    pub frames_dir: PathBuf,
    pub video_file: PathBuf,
    pub size: Resolution,
    pub background: [u8; 3],
    pub filter: ImageFilter,
    pub encode: EncodeSettings,
    pub clear_frames_after_build: bool,
}

impl RebuildPlan {
    pub fn from_config(config: &FrameConfig) -> Self {
        Self {
            frames_dir: config.paths.resized_dir.clone(),
            video_file: config.paths.video_file.clone(),
            size: config.video.resolution,
            background: config.video.background,
            filter: config.image_filter(),
            encode: config.encode_settings(),
            clear_frames_after_build: config.video.clear_frames_after_build,
        }
    }

    /// Drop the old video, normalize `images_dir` and encode a new one.
    /// Blocking.
    pub fn rebuild(
        &self,
        images_dir: &Path,
        encoder: &dyn Encoder,
    ) -> Result<SlideshowVideo, CycleError> {
        match std::fs::remove_file(&self.video_file) {
            Ok(()) => debug!("Removed old video {}", self.video_file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let frames = normalize_folder(
            images_dir,
            &self.frames_dir,
            self.size,
            self.background,
            &self.filter,
        )?;
        debug!("Normalized {} images at {}", frames.len(), self.size);

        let video = build_slideshow(
            encoder,
            &self.frames_dir,
            &self.video_file,
            &self.encode,
            &self.filter,
        )?;

        if self.clear_frames_after_build {
            clear_folder(&self.frames_dir)?;
        }
        Ok(video)
    }
}

/// Owns the change source, the player handles and the cycle state.
pub struct Orchestrator<S> {
    source: S,
    plan: RebuildPlan,
    encoder: Arc<dyn Encoder>,
    controller: PlaybackController,
    default_image: DefaultImage,
    poll_interval: Duration,
    state: CycleState,
    player: Option<PlaybackHandle>,
    fallback: Option<PlaybackHandle>,
    last_video: Option<SlideshowVideo>,
}

impl<S: ChangeSource> Orchestrator<S> {
    pub fn new(
        source: S,
        config: &FrameConfig,
        encoder: Arc<dyn Encoder>,
        controller: PlaybackController,
    ) -> Self {
        Self {
            source,
            plan: RebuildPlan::from_config(config),
            encoder,
            controller,
            default_image: DefaultImage::from_config(config),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            state: CycleState::Idle,
            player: None,
            fallback: None,
            last_video: None,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The video currently handed to the player, if any.
    pub fn last_video(&self) -> Option<&SlideshowVideo> {
        self.last_video.as_ref()
    }

    pub fn player_mut(&mut self) -> Option<&mut PlaybackHandle> {
        self.player.as_mut()
    }

    pub fn fallback_mut(&mut self) -> Option<&mut PlaybackHandle> {
        self.fallback.as_mut()
    }

    fn enter(&mut self, state: CycleState) {
        if self.state != state {
            debug!("Cycle state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Run one cycle and return the state it ended in: `Idle` when nothing
    /// changed, `Playing` after a rebuild, `Degraded` after any failure.
    pub async fn run_cycle(&mut self) -> CycleState {
        match self.try_cycle().await {
            Ok(state) => state,
            Err(e) => {
                error!("An error occurred: {}", e);
                self.enter(CycleState::Degraded);
                self.show_default();
                CycleState::Degraded
            }
        }
    }

    async fn try_cycle(&mut self) -> Result<CycleState, CycleError> {
        self.enter(CycleState::Syncing);
        if !self.source.poll().await? {
            self.enter(CycleState::Idle);
            return Ok(CycleState::Idle);
        }

        self.enter(CycleState::Rebuilding);
        let result = self.rebuild_and_play().await;
        match result {
            Ok(()) => {
                self.source.commit();
                self.enter(CycleState::Playing);
                Ok(CycleState::Playing)
            }
            Err(e) => {
                self.source.abandon();
                Err(e)
            }
        }
    }

    async fn rebuild_and_play(&mut self) -> Result<(), CycleError> {
        let plan = self.plan.clone();
        let encoder = Arc::clone(&self.encoder);
        let images_dir = self.source.images_dir().to_path_buf();
        let video =
            tokio::task::spawn_blocking(move || plan.rebuild(&images_dir, encoder.as_ref()))
                .await??;

        let handle = self.controller.play(&video.path, self.player.take())?;
        self.player = Some(handle);
        if let Some(viewer) = self.fallback.take() {
            viewer.terminate();
        }
        info!(
            "Slideshow updated: {} frames from {}",
            video.frames.len(),
            self.source.name()
        );
        self.last_video = Some(video);
        Ok(())
    }

    fn show_default(&mut self) {
        match self
            .controller
            .show_default(&self.default_image, self.fallback.take())
        {
            Ok(handle) => self.fallback = Some(handle),
            Err(e) => error!("Could not show default image: {}", e),
        }
    }

    /// Cycle until `shutdown` resolves, sleeping the poll interval between
    /// cycles, then stop the players.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Watching {} every {}s",
            self.source.name(),
            self.poll_interval.as_secs()
        );
        loop {
            self.run_cycle().await;
            if self.state != CycleState::Degraded {
                self.enter(CycleState::Idle);
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        self.shutdown();
    }

    /// Stop every player this loop started and restore the taskbar.
    pub fn shutdown(&mut self) {
        info!("Shutting down");
        if let Some(handle) = self.player.take() {
            handle.terminate();
        }
        if let Some(handle) = self.fallback.take() {
            handle.terminate();
        }
        self.controller.restore_taskbar();
    }
}
