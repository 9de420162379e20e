//! Integration tests for transcript recording and replay.
//!
//! Records a capture against the simulated camera, saves it to disk, and
//! re-runs the same capture from the saved transcript alone.

use linksprite_camera::test_utils::{synthetic_jpeg, SimulatedCamera};
use linksprite_camera::transcript::{
    read_metadata, read_transcript, Direction, RecordingTransport, ReplayTransport,
    TranscriptMetadata,
};
use linksprite_camera::{CameraConfig, CameraError, JpegCollector, LinkspriteCamera};

#[test]
fn test_recorded_capture_replays_identically() -> anyhow::Result<()> {
    let image = synthetic_jpeg(700);
    let device = SimulatedCamera::new(image.clone())
        .with_max_read(32)
        .with_corrupt_trailers(256, 1);
    let config = CameraConfig::without_delays();

    let mut camera = LinkspriteCamera::new(RecordingTransport::new(device), config.clone())?;
    let recorded = camera.capture_image(&mut JpegCollector::new())?;
    assert_eq!(recorded.retries, 1);

    let dir = tempfile::tempdir()?;
    let saved = camera.into_inner().save(
        dir.path(),
        TranscriptMetadata {
            chunk_size: config.chunk_size,
            description: "corrupt trailer at 0x100".to_string(),
            ..Default::default()
        },
    )?;

    let meta = read_metadata(&saved.metadata_path)?;
    assert_eq!(meta.chunk_size, 256);
    assert_eq!(meta.host_writes, 6);

    let entries = read_transcript(&saved.transcript_path)?;
    assert_eq!(entries[0].direction, Direction::HostToDevice);
    assert_eq!(entries[0].data, vec![0x56, 0x00, 0x36, 0x01, 0x00]);

    let replay = ReplayTransport::load(&saved.transcript_path)?;
    assert!(replay.metadata().is_some());

    let mut camera = LinkspriteCamera::new(replay, config)?;
    let mut collector = JpegCollector::new();
    let replayed = camera.capture_image(&mut collector)?;

    assert_eq!(replayed, recorded);
    assert_eq!(collector.into_image(), Some(image));
    assert_eq!(camera.transport().mismatches(), 0);
    assert_eq!(camera.transport().remaining(), 0);
    Ok(())
}

#[test]
fn test_failed_capture_replays_same_failure() -> anyhow::Result<()> {
    let device = SimulatedCamera::new(synthetic_jpeg(600)).with_advisory_size(300);
    let config = CameraConfig::without_delays();

    let mut camera = LinkspriteCamera::new(RecordingTransport::new(device), config.clone())?;
    let first = camera.capture_image(&mut JpegCollector::new());
    assert!(matches!(first, Err(CameraError::MissingEndMarker { .. })));

    let dir = tempfile::tempdir()?;
    let saved = camera
        .into_inner()
        .save(dir.path(), TranscriptMetadata::default())?;

    let mut camera = LinkspriteCamera::new(ReplayTransport::load(&saved.transcript_path)?, config)?;
    let second = camera.capture_image(&mut JpegCollector::new());

    assert!(matches!(
        second,
        Err(CameraError::MissingEndMarker { address: 256 })
    ));
    Ok(())
}
