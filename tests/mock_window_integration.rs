//! Integration tests for the mock window capture path

use std::fs;

use game_qa::detector::encode_data_uri;
use game_qa::session::Session;
use game_qa::window::{ClickVia, DomClickOptions, Framebuffer, MockWindow, WindowError, WindowHost};

#[tokio::test]
async fn test_mock_capture_into_session() {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let session = Session::in_dir(tmp.path().join("captures"));
    session.init().expect("Failed to init session");

    let mut window = MockWindow::new(800, 600);
    let opened = window.open_or_reuse("https://example.com/game").await.unwrap();
    assert!(opened.success);

    let png = window.capture_screenshot().await.expect("Capture failed");
    let path = session.capture_path("initial");
    fs::write(&path, &png).unwrap();
    assert!(path.exists(), "Screenshot file not created");

    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (800, 600));
    assert!(encode_data_uri(&png).starts_with("data:image/png;base64,iVBOR"));
}

#[test]
fn test_framebuffer_operations() {
    let mut fb = Framebuffer::new(100, 100, [0, 0, 0]);

    fb.fill([128, 128, 128]);
    assert_eq!(fb.get_pixel(50, 50), [128, 128, 128]);

    fb.draw_rect(10, 10, 20, 20, [255, 0, 0]);
    assert_eq!(fb.get_pixel(15, 15), [255, 0, 0]);
    assert_eq!(fb.get_pixel(35, 35), [128, 128, 128]);

    let png = fb.to_png().expect("Failed to create PNG");
    let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(decoded.get_pixel(15, 15).0, [255, 0, 0]);
}

#[tokio::test]
async fn test_clicks_leave_markers_in_next_capture() {
    let mut window = MockWindow::new(200, 120);
    window.open_or_reuse("about:blank").await.unwrap();
    let before = window.capture_screenshot().await.unwrap();

    window.perform_click(0, 100.0, 60.0).await.unwrap();
    let after = window.capture_screenshot().await.unwrap();
    assert_ne!(before, after);

    let frame = image::load_from_memory(&after).unwrap().to_rgb8();
    assert_eq!(frame.get_pixel(100, 60).0, [255, 64, 64]);
}

#[tokio::test]
async fn test_closed_window_rejects_input() {
    let mut window = MockWindow::new(64, 64);
    assert!(matches!(
        window.perform_click(1, 1.0, 1.0).await,
        Err(WindowError::NotOpen)
    ));

    window.open_or_reuse("about:blank").await.unwrap();
    let outcome = window
        .click_in_dom(10.0, 10.0, &DomClickOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.via, ClickVia::InDom);

    window.close().await.unwrap();
    assert!(matches!(
        window.window_metrics().await,
        Err(WindowError::NotOpen)
    ));
}
