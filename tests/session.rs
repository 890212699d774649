//! Conversation session integration tests
//!
//! Runs the session state machine over a scripted transport, without
//! audio hardware or a live peer.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use hearth_companion::Error;
use hearth_companion::audio::{AudioChannel, Consumer, InputHandle};
use hearth_companion::config::AudioSettings;
use hearth_companion::session::{
    ClientEvent, ConversationSession, EndReason, ErrorDetail, ServerEvent, SessionOutcome,
    Speaker, decode_audio, encode_audio,
};

mod common;

use common::{Script, ScriptedTransport, loud_frame, quiet_frame, session_context};

/// Run a session with an outer guard so a wedged loop fails the test
/// instead of hanging it.
async fn run_guarded(
    session: ConversationSession,
    transport: ScriptedTransport,
    input: InputHandle,
) -> SessionOutcome {
    tokio::time::timeout(Duration::from_secs(10), session.run(transport, input))
        .await
        .expect("session did not finish in time")
}

#[tokio::test]
async fn test_greeting_timeout_ends_silent_session() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let mut ctx = session_context(&channel);
    ctx.tuning.greeting_timeout_secs = 1;
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![]);
    let sent = Arc::clone(&transport.sent);
    let closed = Arc::clone(&transport.closed);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::GreetingTimeout);
    assert!(outcome.transcript.is_empty());
    assert_eq!(outcome.language, "ko");
    assert!(closed.load(Ordering::SeqCst));

    let sent = sent.lock().unwrap();
    assert!(matches!(sent[0], ClientEvent::SessionUpdate { .. }));
    assert!(matches!(sent[1], ClientEvent::ResponseCreate { .. }));
}

#[tokio::test]
async fn test_greeting_playback_unblocks_listening() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let mut ctx = session_context(&channel);
    // Tight greeting window: only the drain transition re-arms the
    // idle clock in time for the later sleep phrase
    ctx.tuning.greeting_timeout_secs = 1;
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let samples = vec![2_000_i16; 1_440];
    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::AudioDelta {
            turn: 0,
            delta: encode_audio(&samples),
        }),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Pause(Duration::from_millis(2_000)),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 1,
            transcript: "chocopi annyeong".to_string(),
        }),
    ]);

    let session = ConversationSession::new(ctx);
    // Stand-in for the device engine: pull queued frames, report idle
    // once the sink is empty
    let drainer = async {
        loop {
            if channel.try_pop_output().is_none() {
                channel.output_idle();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::select! {
            outcome = session.run(transport, input) => outcome,
            () = drainer => unreachable!("drainer never finishes"),
        }
    })
    .await
    .expect("session did not finish in time");

    assert_eq!(outcome.end_reason, EndReason::SleepWord);
}

#[tokio::test]
async fn test_sleep_phrase_ends_session() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 1,
            transcript: "Chokopi Anyeong!".to_string(),
        }),
    ]);
    let closed = Arc::clone(&transport.closed);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::SleepWord);
    assert_eq!(outcome.transcript.len(), 1);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_sleep_phrase_respects_threshold() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let mut ctx = session_context(&channel);
    ctx.tuning.sleep_word_threshold = 90;
    ctx.tuning.conversation_timeout_secs = 1;
    let input = channel.acquire_input(Consumer::Session).unwrap();

    // Scores in the mid-80s against "chocopi annyeong": ends the
    // session at the default threshold but not at 90
    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 1,
            transcript: "Chokopi Anyeong!".to_string(),
        }),
    ]);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::Timeout);
    assert_eq!(outcome.transcript.len(), 1);
}

#[tokio::test]
async fn test_connection_fault_preserves_transcript() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 1,
            transcript: "tell me a story".to_string(),
        }),
        Script::Recv(ServerEvent::AudioTranscriptDone {
            turn: 2,
            transcript: "Once upon a time".to_string(),
        }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 3,
            transcript: "what happened next".to_string(),
        }),
        Script::Fail(Error::Connection("reset by peer".to_string())),
    ]);
    let closed = Arc::clone(&transport.closed);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::Fault("connection".to_string()));
    assert_eq!(outcome.transcript.len(), 3);
    let fragments = outcome.transcript.fragments();
    assert_eq!(fragments[0].speaker, Speaker::User);
    assert_eq!(fragments[1].speaker, Speaker::Assistant);
    assert_eq!(fragments[2].text, "what happened next");
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_out_of_order_fragments_sort_by_turn() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Recv(ServerEvent::AudioTranscriptDone {
            turn: 2,
            transcript: "I can hear you".to_string(),
        }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 1,
            transcript: "can you hear me".to_string(),
        }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 3,
            transcript: "chocopi annyeong".to_string(),
        }),
    ]);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::SleepWord);
    let turns: Vec<u64> = outcome
        .transcript
        .fragments()
        .iter()
        .map(|f| f.turn)
        .collect();
    assert_eq!(turns, vec![1, 2, 3]);
    assert_eq!(outcome.transcript.fragments()[0].speaker, Speaker::User);
}

#[tokio::test]
async fn test_barge_in_interrupts_assistant() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let samples = vec![2_000_i16; 1_440];
    let audio = encode_audio(&samples);
    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Recv(ServerEvent::AudioDelta {
            turn: 1,
            delta: audio.clone(),
        }),
        // Assistant pauses mid-utterance; the user talks over it here
        Script::Pause(Duration::from_millis(600)),
        // Late delta for the cancelled turn must be dropped
        Script::Recv(ServerEvent::AudioDelta {
            turn: 1,
            delta: audio,
        }),
        Script::Pause(Duration::from_millis(300)),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 2,
            transcript: "chocopi annyeong".to_string(),
        }),
    ]);
    let sent = Arc::clone(&transport.sent);

    let session = ConversationSession::new(ctx);
    let feeder = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let flush_before = channel.flush_gen();
        channel.feed(loud_frame());
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Playback was flushed from the capture side, before any peer
        // round-trip
        assert!(channel.flush_gen() > flush_before);
    };

    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(session.run(transport, input), feeder)
    })
    .await
    .expect("session did not finish in time");

    assert_eq!(outcome.end_reason, EndReason::SleepWord);

    let sent = sent.lock().unwrap();
    let cancel_at = sent
        .iter()
        .position(|e| matches!(e, ClientEvent::ResponseCancel))
        .expect("no response.cancel sent");
    assert!(matches!(sent[cancel_at + 1], ClientEvent::OutputAudioClear));
    // The frame that triggered the barge still reaches the peer as input
    assert!(
        sent.iter()
            .any(|e| matches!(e, ClientEvent::InputAudioAppend { .. }))
    );
}

#[tokio::test]
async fn test_peer_close_ends_session() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Close,
    ]);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::PeerClosed);
    assert!(outcome.transcript.is_empty());
}

#[tokio::test]
async fn test_malformed_messages_are_discarded() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Fail(Error::Protocol("not json".to_string())),
        Script::Fail(Error::Protocol("unexpected frame".to_string())),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
        Script::Recv(ServerEvent::TranscriptionCompleted {
            turn: 1,
            transcript: "chocopi annyeong".to_string(),
        }),
    ]);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::SleepWord);
    assert_eq!(outcome.transcript.len(), 1);
}

#[tokio::test]
async fn test_repeated_malformed_messages_fault() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Fail(Error::Protocol("not json".to_string())),
        Script::Fail(Error::Protocol("not json".to_string())),
        Script::Fail(Error::Protocol("not json".to_string())),
    ]);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::Fault("protocol".to_string()));
}

#[tokio::test]
async fn test_peer_error_frame_faults() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::Error {
            error: ErrorDetail {
                code: Some("server_error".to_string()),
                message: "internal failure".to_string(),
            },
        }),
    ]);

    let outcome = run_guarded(ConversationSession::new(ctx), transport, input).await;

    assert_eq!(outcome.end_reason, EndReason::Fault("protocol".to_string()));
}

#[tokio::test]
async fn test_mic_frames_are_uploaded() {
    let channel = AudioChannel::new(&AudioSettings::default());
    let ctx = session_context(&channel);
    let cancel = ctx.cancel.clone();
    let input = channel.acquire_input(Consumer::Session).unwrap();

    let transport = ScriptedTransport::new(vec![
        Script::Recv(ServerEvent::SessionCreated),
        Script::Recv(ServerEvent::ResponseDone { turn: 0 }),
    ]);
    let sent = Arc::clone(&transport.sent);

    let session = ConversationSession::new(ctx);
    let feeder = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        for _ in 0..3 {
            channel.feed(quiet_frame());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        cancel.cancel();
    };

    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(session.run(transport, input), feeder)
    })
    .await
    .expect("session did not finish in time");

    assert_eq!(outcome.end_reason, EndReason::Stop);

    let sent = sent.lock().unwrap();
    assert!(matches!(sent[0], ClientEvent::SessionUpdate { .. }));
    assert!(matches!(sent[1], ClientEvent::ResponseCreate { .. }));
    let uploads: Vec<&String> = sent
        .iter()
        .filter_map(|e| match e {
            ClientEvent::InputAudioAppend { audio } => Some(audio),
            _ => None,
        })
        .collect();
    assert_eq!(uploads.len(), 3);
    assert_eq!(decode_audio(uploads[0]).unwrap(), quiet_frame().samples);
}
