use anyhow::Result;
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::Array3;

use clickseg::{
    ArtifactKind, ArtifactSink, Click, EmbeddingModel, Error, FeatureSpace, SessionConfig,
    SessionState, IMAGE_OFFSET,
};

/// Small working resolution so tests stay fast; grid is 32x32.
fn small_config() -> SessionConfig {
    SessionConfig {
        normalized_size: 64,
        downsample_factor: 2,
    }
}

fn gradient_image(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 128])
    })
}

fn click(image_index: usize, row: usize, col: usize, positive: bool) -> Click {
    Click {
        image_index,
        row,
        col,
        positive,
    }
}

/// Records every push instead of sending it anywhere.
#[derive(Default)]
struct CaptureSink {
    pushes: Vec<(usize, ArtifactKind)>,
}

impl ArtifactSink for CaptureSink {
    fn push(&mut self, image_index: usize, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        assert!(!bytes.is_empty(), "pushed artifact must carry bytes");
        self.pushes.push((image_index, kind));
        Ok(())
    }
}

#[test]
fn click_pixel_probability_reaches_one() {
    let mut session = SessionState::new(small_config());
    session
        .add_image(gradient_image(64, 64))
        .expect("image registers");

    session
        .add_click(click(0, 10, 10, true), 1)
        .expect("click applies");

    let viewer = session.viewer(0).expect("viewer exists");
    let prob = viewer.probability().expect("probability computed");
    assert_eq!(prob.dim(), (64, 64));

    // Grid (10, 10) maps back to source (20, 20) at downsampling 2.
    assert!((prob[[20, 20]] - 1.0).abs() < 1e-6);
    assert!(viewer.mask().expect("mask computed")[[20, 20]]);
}

#[test]
fn negative_only_session_stays_below_threshold() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_click(click(0, 5, 5, false), 1).unwrap();

    let viewer = session.viewer(0).unwrap();
    assert!(viewer.probability().unwrap().iter().all(|&p| p == 0.0));
    assert!(viewer.mask().unwrap().iter().all(|&m| !m));
}

#[test]
fn stale_click_count_is_rejected_without_mutation() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();

    session
        .add_click(click(0, 3, 3, true), 1)
        .expect("first click with count 1 succeeds");

    // Duplicate delivery reports the same running count.
    let err = session.add_click(click(0, 4, 4, true), 1).unwrap_err();
    assert!(matches!(
        err,
        Error::Sequencing {
            reported: 1,
            expected: 2
        }
    ));
    assert_eq!(session.clicks().len(), 1);
    assert_eq!(session.exemplars().len(), 1);
}

#[test]
fn click_on_unknown_image_is_rejected() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();

    let err = session.add_click(click(3, 0, 0, true), 1).unwrap_err();
    assert!(matches!(err, Error::UnknownImage(3, 1)));
    assert!(session.clicks().is_empty());
}

#[test]
fn click_outside_the_grid_is_rejected() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();

    // Grid is 32x32 at downsampling 2.
    let err = session.add_click(click(0, 40, 0, true), 1).unwrap_err();
    assert!(matches!(err, Error::ClickOutOfBounds { .. }));
    assert!(session.clicks().is_empty());
}

#[test]
fn threshold_change_only_rebuilds_masks() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_click(click(0, 2, 2, true), 1).unwrap();
    session.add_click(click(0, 20, 20, false), 2).unwrap();

    let before = session.viewer(0).unwrap().probability().unwrap().clone();

    // Drain the dirty flags so the threshold change is observable alone.
    let mut sink = CaptureSink::default();
    session.publish(&mut sink).unwrap();

    session.set_threshold(0.9).unwrap();

    let viewer = session.viewer(0).unwrap();
    let after = viewer.probability().unwrap();
    assert_eq!(&before, after, "probabilities must not change");

    let mask = viewer.mask().unwrap();
    for (p, m) in after.iter().zip(mask.iter()) {
        assert_eq!(*m, *p > 0.9);
    }

    assert!(viewer.dirty().mask);
    assert!(!viewer.dirty().probability);
    assert!(!viewer.dirty().preview);
}

#[test]
fn invalid_hyperparameters_are_rejected() {
    let mut session = SessionState::new(small_config());
    assert!(matches!(session.set_k(0), Err(Error::InvalidK)));
    assert!(matches!(
        session.set_threshold(1.5),
        Err(Error::InvalidThreshold(_))
    ));
}

#[test]
fn adding_an_image_preserves_existing_probabilities() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_click(click(0, 4, 4, true), 1).unwrap();
    session.add_click(click(0, 28, 28, false), 2).unwrap();

    let before = session.viewer(0).unwrap().probability().unwrap().clone();

    session.add_image(gradient_image(48, 80)).unwrap();

    let after = session.viewer(0).unwrap().probability().unwrap();
    assert_eq!(&before, after);

    // The new image was classified against the existing exemplars.
    let added = session.viewer(1).unwrap();
    assert!(added.probability().is_some());
    // Native resolution, (height, width).
    assert_eq!(added.probability().unwrap().dim(), (80, 48));
}

#[test]
fn feature_space_sync_is_idempotent() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_click(click(1, 7, 9, true), 1).unwrap();

    session.set_feature_space(FeatureSpace::Hue).unwrap();
    let grids_first: Vec<_> = session.feature_store().grids().to_vec();
    let exemplars_first = session.exemplars().to_vec();

    session.set_feature_space(FeatureSpace::Hue).unwrap();
    assert_eq!(session.feature_store().grids(), &grids_first[..]);
    assert_eq!(session.exemplars(), &exemplars_first[..]);
}

#[test]
fn exemplars_are_resampled_on_space_change() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_click(click(0, 7, 9, true), 1).unwrap();

    // Position space: the exemplar is its own grid coordinates.
    assert_eq!(session.exemplars()[0].as_slice().unwrap(), &[7.0, 9.0, 0.0]);

    session.set_feature_space(FeatureSpace::Color).unwrap();
    let exemplar = &session.exemplars()[0];
    assert_eq!(exemplar.len(), 3);
    // Color features are 0..255 pixel values, not coordinates.
    let grid = &session.feature_store().grids()[0];
    assert_eq!(exemplar[0], grid[[7, 9, 0]]);
}

#[test]
fn position_offsets_separate_images() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_image(gradient_image(64, 64)).unwrap();

    let grids = session.feature_store().grids();
    let (height, width, _) = grids[0].dim();
    for row in 0..height {
        for col in 0..width {
            let delta = grids[1][[row, col, 2]] - grids[0][[row, col, 2]];
            assert_eq!(delta, IMAGE_OFFSET);
        }
    }
}

#[test]
fn publish_pushes_each_dirty_artifact_once() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();

    let mut sink = CaptureSink::default();
    session.publish(&mut sink).unwrap();
    assert_eq!(sink.pushes, vec![(0, ArtifactKind::Preview)]);

    // Nothing is dirty anymore.
    let mut sink = CaptureSink::default();
    session.publish(&mut sink).unwrap();
    assert!(sink.pushes.is_empty());

    session.add_click(click(0, 1, 1, true), 1).unwrap();
    let mut sink = CaptureSink::default();
    session.publish(&mut sink).unwrap();
    assert_eq!(
        sink.pushes,
        vec![(0, ArtifactKind::Probability), (0, ArtifactKind::Mask)]
    );
}

#[test]
fn reset_returns_to_the_initial_state() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_click(click(0, 1, 1, true), 1).unwrap();
    session.set_k(3).unwrap();
    session.set_threshold(0.2).unwrap();
    session.set_feature_space(FeatureSpace::Color).unwrap();

    session.reset();

    assert!(session.viewers().is_empty());
    assert!(session.clicks().is_empty());
    assert!(session.exemplars().is_empty());
    assert!(session.feature_store().is_empty());
    assert_eq!(session.k(), 1);
    assert_eq!(session.threshold(), 0.5);
    assert_eq!(session.feature_space(), FeatureSpace::Position);
}

/// Deterministic stand-in for a deep embedding backend.
struct StubEmbedding {
    patch: u32,
    dim: usize,
    /// Return one spare row to violate the resolution contract.
    broken: bool,
}

impl EmbeddingModel for StubEmbedding {
    fn embed(&mut self, image: &RgbImage) -> Result<Array3<f32>> {
        let mut rows = (image.height() / self.patch) as usize;
        let cols = (image.width() / self.patch) as usize;
        if self.broken {
            rows += 1;
        }
        Ok(Array3::from_shape_fn((rows, cols, self.dim), |(r, c, f)| {
            (r * 31 + c * 7 + f) as f32
        }))
    }

    fn patch_size(&self) -> u32 {
        self.patch
    }
}

#[test]
fn stubbed_embedding_space_classifies() {
    let model = StubEmbedding {
        patch: 2,
        dim: 8,
        broken: false,
    };
    let mut session = SessionState::with_embedding(small_config(), Some(Box::new(model)));
    session.add_image(gradient_image(64, 64)).unwrap();
    session
        .set_feature_space(FeatureSpace::DeepEmbedding)
        .unwrap();

    assert_eq!(session.feature_store().grids()[0].dim(), (32, 32, 8));

    session.add_click(click(0, 3, 3, true), 1).unwrap();
    let prob = session.viewer(0).unwrap().probability().unwrap();
    assert!(prob.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn embedding_resolution_contract_is_enforced() {
    let model = StubEmbedding {
        patch: 2,
        dim: 8,
        broken: true,
    };
    let mut session = SessionState::with_embedding(small_config(), Some(Box::new(model)));
    session.add_image(gradient_image(64, 64)).unwrap();

    let err = session
        .set_feature_space(FeatureSpace::DeepEmbedding)
        .unwrap_err();
    assert!(matches!(err, Error::ResolutionMismatch { .. }));

    // The failed sync left the session on its previous space.
    assert_eq!(session.feature_space(), FeatureSpace::Position);
    assert_eq!(session.feature_store().grids()[0].dim(), (32, 32, 3));
}

#[test]
fn embedding_space_without_a_model_is_unavailable() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();

    let err = session
        .set_feature_space(FeatureSpace::DeepEmbedding)
        .unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable));
}

#[test]
fn masks_follow_probabilities_pointwise() {
    let mut session = SessionState::new(small_config());
    session.add_image(gradient_image(64, 64)).unwrap();
    session.add_image(gradient_image(32, 32)).unwrap();
    session.add_click(click(0, 4, 4, true), 1).unwrap();
    session.add_click(click(1, 10, 12, false), 2).unwrap();
    session.set_k(2).unwrap();

    for viewer in session.viewers() {
        let prob = viewer.probability().unwrap();
        let mask = viewer.mask().unwrap();
        assert_eq!(prob.dim(), mask.dim());
        for (p, m) in prob.iter().zip(mask.iter()) {
            assert!((0.0..=1.0).contains(p));
            assert_eq!(*m, *p > session.threshold());
        }
    }
}
