//! Console speech engines
//!
//! Development stand-ins for the platform engines: STT reads utterances line
//! by line from stdin, TTS prints sentences to stdout. Both speak the same
//! event protocol as the real engines, so the session behaves identically.

use crate::speech::{SentenceSplitter, SttEngine, SttEvent, TtsEngine, TtsEvent};
use crate::Result;
use crossbeam_channel::Sender;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// STT engine that treats each stdin line as one final utterance
pub struct ConsoleStt {
    events: Sender<SttEvent>,
    listening: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    reader_started: bool,
}

impl ConsoleStt {
    /// Create a console STT engine emitting on `events`
    pub fn new(events: Sender<SttEvent>) -> Self {
        Self {
            events,
            listening: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            reader_started: false,
        }
    }

    fn spawn_reader(&mut self) {
        if self.reader_started {
            return;
        }
        self.reader_started = true;

        let events = self.events.clone();
        let listening = self.listening.clone();
        let paused = self.paused.clone();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if !listening.load(Ordering::SeqCst) || paused.load(Ordering::SeqCst) {
                    continue;
                }
                let text = line.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if events.send(SttEvent::Final(text)).is_err() {
                    break;
                }
            }
            let _ = events.send(SttEvent::Ended);
        });
    }
}

impl SttEngine for ConsoleStt {
    fn start(&mut self, lang: &str) -> Result<()> {
        debug!("Console STT listening (lang: {})", lang);
        self.listening.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.spawn_reader();
        Ok(())
    }

    fn stop(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

/// TTS engine that prints sentences to stdout
///
/// Playback is instantaneous, so every queued batch drains in one go and
/// `Finished` follows immediately. The session tolerates that: it treats the
/// turn as spoken once both the relay and the TTS queue are done.
pub struct ConsoleTts {
    events: Sender<TtsEvent>,
    splitter: SentenceSplitter,
    speaking: bool,
}

impl ConsoleTts {
    /// Create a console TTS engine emitting on `events`
    pub fn new(events: Sender<TtsEvent>) -> Self {
        Self {
            events,
            splitter: SentenceSplitter::new(),
            speaking: false,
        }
    }

    fn play(&mut self, text: &str) {
        let sentences = self.splitter.split(text);
        if sentences.is_empty() {
            return;
        }
        if !self.speaking {
            self.speaking = true;
            let _ = self.events.send(TtsEvent::Started);
        }
        for sentence in sentences {
            println!("[voice] {}", sentence);
            let _ = self.events.send(TtsEvent::Sentence(sentence));
        }
        self.speaking = false;
        let _ = self.events.send(TtsEvent::Finished);
    }
}

impl TtsEngine for ConsoleTts {
    fn speak(&mut self, text: &str) {
        self.play(text);
    }

    fn add_chunk(&mut self, text: &str) {
        self.play(text);
    }

    fn stop(&mut self) {
        if self.speaking {
            self.speaking = false;
            let _ = self.events.send(TtsEvent::Finished);
        }
    }

    fn is_speaking(&self) -> bool {
        self.speaking
    }
}
