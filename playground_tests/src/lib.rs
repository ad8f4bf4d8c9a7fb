//! Test support for the playground crates.

use std::time::Duration;

use playground_client::GameClient;
use playground_shared::scene::HeadlessScene;

/// Runs the client's frame hook repeatedly, passing `frame_dt` to each
/// frame. Sleeps only briefly between frames so the background reader
/// tasks get scheduled; per-frame smoothing does not consult wall time.
pub async fn drive_frames(
    client: &mut GameClient,
    scene: &mut HeadlessScene,
    frames: u32,
    frame_dt: Duration,
) {
    for _ in 0..frames {
        client.before_render(scene, frame_dt);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Drives frames until `done` reports true, giving up after `max_frames`.
pub async fn drive_until<F>(
    client: &mut GameClient,
    scene: &mut HeadlessScene,
    max_frames: u32,
    frame_dt: Duration,
    mut done: F,
) -> bool
where
    F: FnMut(&GameClient) -> bool,
{
    for _ in 0..max_frames {
        client.before_render(scene, frame_dt);
        if done(client) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    false
}
