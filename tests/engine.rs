//! Conversation engine integration tests
//!
//! Full turns against fake devices and a scripted backend, on paused time.

use std::time::Duration;

use sitevoice::engine::{EngineConfig, EngineState};
use sitevoice::voice::ResourceKind;
use sitevoice::{Error, ErrorKind, Role};

mod common;

use common::{FakeMicrophone, HANG, Harness, HarnessBuilder, MicScript, eventually};

const PRICING_REPLY: &str = r#"{"response":"Here's our pricing page!","redirect_url":"/pricing"}"#;

/// Close the conversation and check nothing is left open
async fn close_and_check(h: &Harness) {
    h.handle.close().await.unwrap();

    assert_eq!(h.handle.state(), EngineState::Idle);
    assert!(h.resources.snapshot().is_idle(), "{:?}", h.resources.snapshot());
    assert_eq!(h.mic.live_tracks(), 0);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.history.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pricing_page_scenario() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|b| {
            b.with_transcripts(["show me your pricing page"])
                .with_replies([PRICING_REPLY])
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    assert_eq!(h.handle.state(), EngineState::Listening);

    // Reply played and the microphone re-armed without another start_turn
    eventually(|| h.mic.opened() == 2 && h.handle.state() == EngineState::Listening).await;

    assert_eq!(
        &h.host.states()[..5],
        &[
            EngineState::Listening,
            EngineState::Transcribing,
            EngineState::Thinking,
            EngineState::Speaking,
            EngineState::Listening,
        ]
    );

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.history[0].role(), Role::User);
    assert_eq!(snapshot.history[0].content(), "show me your pricing page");
    assert_eq!(snapshot.history[1].role(), Role::Assistant);
    assert_eq!(snapshot.history[1].content(), "Here's our pricing page!");

    assert_eq!(h.backend.spoken(), vec!["Here's our pricing page!".to_string()]);
    assert_eq!(h.host.redirects(), vec!["/pricing".to_string()]);
    assert_eq!(h.speaker.plays(), 1);

    let prompt = &h.backend.prompts()[0];
    assert!(prompt.contains("- Pricing (/pricing): Plans start at $10 per month."));
    assert!(prompt.contains("<user>\nshow me your pricing page\n</user>"));

    // User turn recorded before the completion request, assistant turn before playback
    let user = h.log.position("bubble:user:").unwrap();
    let complete = h.log.position("complete").unwrap();
    let assistant = h.log.position("bubble:assistant:").unwrap();
    let play = h.log.position("play:").unwrap();
    assert!(user < complete);
    assert!(complete < assistant);
    assert!(assistant < play);

    // Capture, completion and playback never overlapped
    assert_eq!(h.resources.peak_concurrent(), 1);

    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_three_empty_transcripts_go_idle() {
    let h = HarnessBuilder::new().spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    assert_eq!(h.mic.opened(), 3);
    assert_eq!(h.backend.transcribe_calls(), 3);
    assert!(h.backend.prompts().is_empty());
    assert!(h.host.errors().is_empty());
    assert_eq!(h.host.mic_enabled(), Some(true));
    assert_eq!(h.mic.live_tracks(), 0);

    // No fourth capture shows up later
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.mic.opened(), 3);
    assert_eq!(h.handle.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_empty_counter_resets_after_speech() {
    let h = HarnessBuilder::new()
        .backend(|b| b.with_transcripts(["", "  ", "hello there"]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    // 2 empties + 1 speech, 1 re-arm after playback, then 3 fresh empties
    assert_eq!(h.mic.opened(), 6);
    assert_eq!(h.backend.transcribe_calls(), 6);
    assert_eq!(h.backend.prompts().len(), 1);
    assert_eq!(h.speaker.plays(), 1);

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.empty_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_restart_resets_counter() {
    let h = HarnessBuilder::new().spawn();

    h.handle.start_turn().await.unwrap();
    eventually(|| h.backend.transcribe_calls() == 2 && h.mic.opened() == 3).await;
    assert_eq!(h.handle.snapshot().await.unwrap().empty_attempts, 2);

    // Restarting from Listening gives a fresh budget of attempts
    h.handle.start_turn().await.unwrap();
    assert_eq!(h.handle.snapshot().await.unwrap().empty_attempts, 0);
    h.handle.wait_for(EngineState::Idle).await.unwrap();
    assert_eq!(h.mic.opened(), 6);
    assert_eq!(h.mic.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_idle_is_noop() {
    let h = HarnessBuilder::new().spawn();
    close_and_check(&h).await;
    assert!(h.host.states().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_while_listening_releases_microphone() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Continuous]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.resources.open(ResourceKind::MicrophoneTrack), 1);
    assert_eq!(h.mic.live_tracks(), 1);

    close_and_check(&h).await;
    assert_eq!(
        h.host.states(),
        vec![EngineState::Listening, EngineState::Closing, EngineState::Idle]
    );
    assert_eq!(h.backend.transcribe_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_transcribing() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|mut b| {
            b.transcribe_delay = HANG;
            b
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Transcribing).await.unwrap();
    assert_eq!(h.mic.live_tracks(), 0);

    close_and_check(&h).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.mic.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_thinking_cancels_request() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|mut b| {
            b.complete_delay = HANG;
            b.with_transcripts(["what do you sell"])
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Thinking).await.unwrap();
    assert_eq!(h.resources.open(ResourceKind::CompletionRequest), 1);

    close_and_check(&h).await;
    assert!(h.backend.spoken().is_empty());
    assert_eq!(h.speaker.plays(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_speaking_stops_playback_and_restart() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .speaker_delay(HANG)
        .backend(|b| b.with_transcripts(["tell me a story"]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Speaking).await.unwrap();
    assert_eq!(h.resources.open(ResourceKind::AudioContext), 1);

    close_and_check(&h).await;

    // Closed during Speaking: no automatic re-arm
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.mic.opened(), 1);
    assert_eq!(h.handle.state(), EngineState::Idle);
    assert!(h.log.position("played").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_stays_idle() {
    let h = HarnessBuilder::new().mic(FakeMicrophone::denied()).spawn();

    let err = h.handle.start_turn().await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    assert_eq!(h.handle.state(), EngineState::Idle);
    assert!(h.host.states().is_empty());
    assert_eq!(h.host.errors(), vec![ErrorKind::PermissionDenied]);
    assert!(h.resources.snapshot().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_transcription_error_surfaces() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|b| b.with_transcript_error(Error::Stt("service unavailable".to_string())))
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    assert_eq!(h.host.errors(), vec![ErrorKind::Transcribe]);
    assert!(h.backend.prompts().is_empty());
    assert_eq!(h.host.mic_enabled(), Some(true));
    assert_eq!(h.mic.live_tracks(), 0);
    assert!(h.resources.snapshot().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_completion_timeout_surfaces() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .config(EngineConfig {
            request_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        })
        .backend(|mut b| {
            b.complete_delay = HANG;
            b.with_transcripts(["are you there"])
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Thinking).await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    assert_eq!(h.host.errors(), vec![ErrorKind::Completion]);
    assert!(h.resources.snapshot().is_idle());

    // The user turn stays in history until the conversation is closed
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 1);
    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_playback_error_surfaces() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .failing_speaker()
        .backend(|b| b.with_transcripts(["hi"]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Speaking).await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    assert_eq!(h.host.errors(), vec![ErrorKind::Playback]);
    assert_eq!(h.host.mic_enabled(), Some(true));
    assert_eq!(h.mic.opened(), 1);
    assert!(h.resources.snapshot().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_capture_error_mid_session() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Fail]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    assert_eq!(h.host.errors(), vec![ErrorKind::Capture]);
    assert_eq!(h.backend.transcribe_calls(), 0);
    assert_eq!(h.mic.live_tracks(), 0);
    assert!(h.resources.snapshot().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_while_listening_transcribes() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Continuous]))
        .backend(|b| b.with_transcripts(["where is the about page"]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.handle.stop().await.unwrap();

    eventually(|| h.backend.prompts().len() == 1).await;
    assert_eq!(h.mic.released(), 1);
    assert!(h.host.states().contains(&EngineState::Transcribing));
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_while_thinking_closes() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|mut b| {
            b.complete_delay = HANG;
            b.with_transcripts(["hello"])
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Thinking).await.unwrap();
    h.handle.stop().await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.history.is_empty());
    assert!(h.host.states().contains(&EngineState::Closing));
    assert!(h.resources.snapshot().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_start_turn_rejected_while_speaking() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .speaker_delay(HANG)
        .backend(|b| b.with_transcripts(["hi"]))
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Speaking).await.unwrap();

    let err = h.handle.start_turn().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(h.handle.state(), EngineState::Speaking);
    assert_eq!(h.host.mic_enabled(), Some(false));

    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_max_capture_length_stops_listening() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Continuous]))
        .max_capture(Duration::from_secs(5))
        .backend(|mut b| {
            b.transcribe_delay = HANG;
            b
        })
        .spawn();

    let started = tokio::time::Instant::now();
    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Transcribing).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(h.mic.live_tracks(), 0);
    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_history_keeps_recent_exchanges() {
    let questions: Vec<String> = (1..=7).map(|i| format!("question {i}")).collect();
    let replies: Vec<String> = (1..=7).map(|i| format!("answer {i}")).collect();

    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech; 7]))
        .backend(|b| {
            b.with_transcripts(questions.iter().map(String::as_str))
                .with_replies(replies.iter().map(String::as_str))
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    eventually(|| h.speaker.plays() == 7).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 10);
    assert_eq!(snapshot.history[0].content(), "question 3");
    assert_eq!(snapshot.history[9].content(), "answer 7");

    // The last prompt only carries what history still holds
    let last_prompt = h.backend.prompts().pop().unwrap();
    assert!(!last_prompt.contains("question 1\n"));
    assert!(last_prompt.contains("question 3"));
    assert_eq!(h.resources.peak_concurrent(), 1);

    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_while_reopening_keeps_history() {
    let h = HarnessBuilder::new()
        .mic(
            FakeMicrophone::new([MicScript::Speech])
                .with_open_delays([Duration::ZERO, Duration::from_secs(1)]),
        )
        .backend(|b| {
            b.with_transcripts(["show me your pricing page"])
                .with_replies([PRICING_REPLY])
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Speaking).await.unwrap();
    // Playback ended; the microphone is still reopening
    h.handle.wait_for(EngineState::Listening).await.unwrap();
    assert_eq!(h.mic.opened(), 1);

    h.handle.stop().await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.history[1].content(), "Here's our pricing page!");
    assert!(!h.host.states().contains(&EngineState::Closing));
    assert!(h.host.errors().is_empty());
    assert_eq!(h.host.mic_enabled(), Some(true));

    // The abandoned open never completes
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.mic.opened(), 1);
    assert_eq!(h.handle.state(), EngineState::Idle);
    assert!(h.resources.snapshot().is_idle());

    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_while_first_open_pending() {
    let h = HarnessBuilder::new()
        .mic(
            FakeMicrophone::new([MicScript::Continuous])
                .with_open_delays([Duration::from_secs(1)]),
        )
        .spawn();

    let (started, stopped) = tokio::join!(h.handle.start_turn(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.handle.stop().await
    });
    stopped.unwrap();
    assert!(matches!(started, Err(Error::InvalidState(_))));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.mic.opened(), 0);
    assert_eq!(h.handle.state(), EngineState::Idle);
    assert!(h.host.states().is_empty());

    // A fresh turn still starts
    h.handle.start_turn().await.unwrap();
    assert_eq!(h.handle.state(), EngineState::Listening);
    close_and_check(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_error_surfaces() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|mut b| {
            b.synthesize_delay = Duration::from_secs(1);
            b.with_transcripts(["read me the about page"])
                .with_synthesis_error(Error::Tts("voice unavailable".to_string()))
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Thinking).await.unwrap();
    h.handle.wait_for(EngineState::Idle).await.unwrap();

    assert_eq!(h.host.errors(), vec![ErrorKind::Synthesis]);
    assert_eq!(h.handle.state(), EngineState::Idle);
    assert_eq!(h.host.mic_enabled(), Some(true));
    assert_eq!(h.speaker.plays(), 0);
    assert_eq!(h.mic.opened(), 1);
    assert!(h.resources.snapshot().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_close_while_synthesizing() {
    let h = HarnessBuilder::new()
        .mic(FakeMicrophone::new([MicScript::Speech]))
        .backend(|mut b| {
            b.synthesize_delay = HANG;
            b.with_transcripts(["tell me about widgets"])
        })
        .spawn();

    h.handle.start_turn().await.unwrap();
    h.handle.wait_for(EngineState::Thinking).await.unwrap();
    eventually(|| h.backend.spoken().len() == 1).await;
    assert_eq!(h.handle.state(), EngineState::Thinking);

    close_and_check(&h).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.speaker.plays(), 0);
    assert_eq!(h.mic.opened(), 1);
    assert_eq!(h.handle.state(), EngineState::Idle);
}
