//! Single-active-video arbitration.
//!
//! Every mounted feed card has a [`PlaybackState`]. Visibility batches and
//! sound toggles are the only inputs; the arbiter answers with the
//! [`PlaybackCommand`]s a player backend has to apply. After every input at
//! most one card is playing and at most one card is unmuted.

use std::collections::HashMap;

pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Paused,
    PlayingMuted,
    PlayingUnmuted,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        !matches!(self, PlaybackState::Paused)
    }

    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Paused => "paused",
            PlaybackState::PlayingMuted => "playing (muted)",
            PlaybackState::PlayingUnmuted => "playing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackCommand {
    Play { video_id: String, src: String, muted: bool },
    Pause { video_id: String },
    SetMuted { video_id: String, muted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundToggle {
    On,
    Off,
    Unknown,
}

#[derive(Debug, Clone)]
struct Mounted {
    src: String,
    state: PlaybackState,
    /// Sound was switched on by the user; survives pause/resume.
    unmuted: bool,
    order: usize,
}

#[derive(Debug, Clone)]
pub struct Arbiter {
    threshold: f32,
    mounted: HashMap<String, Mounted>,
    next_order: usize,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_THRESHOLD)
    }
}

impl Arbiter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.01, 1.0),
            mounted: HashMap::new(),
            next_order: 0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Registers a card. Cards start paused and muted. Mounting an id twice
    /// keeps the existing state.
    pub fn mount(&mut self, video_id: &str, src: &str) {
        if self.mounted.contains_key(video_id) {
            return;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.mounted.insert(
            video_id.to_string(),
            Mounted {
                src: src.to_string(),
                state: PlaybackState::Paused,
                unmuted: false,
                order,
            },
        );
    }

    /// Drops every card, pausing whatever was playing.
    pub fn reset(&mut self) -> Vec<PlaybackCommand> {
        let commands = self
            .mounted
            .iter()
            .filter(|(_, card)| card.state.is_playing())
            .map(|(id, _)| PlaybackCommand::Pause {
                video_id: id.clone(),
            })
            .collect();
        self.mounted.clear();
        self.next_order = 0;
        commands
    }

    pub fn state(&self, video_id: &str) -> Option<PlaybackState> {
        self.mounted.get(video_id).map(|card| card.state)
    }

    pub fn len(&self) -> usize {
        self.mounted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }

    pub fn active(&self) -> Option<&str> {
        self.mounted
            .iter()
            .find(|(_, card)| card.state.is_playing())
            .map(|(id, _)| id.as_str())
    }

    pub fn count_in(&self, state: PlaybackState) -> usize {
        self.mounted
            .values()
            .filter(|card| card.state == state)
            .count()
    }

    /// Applies a batch of `(video_id, visible_fraction)` observations.
    ///
    /// Cards missing from the batch keep their current visibility. When more
    /// than one card crosses the threshold the most visible one wins, ties
    /// going to the card mounted first.
    pub fn observe(&mut self, batch: &[(String, f32)]) -> Vec<PlaybackCommand> {
        let mut winner: Option<(&str, f32, usize)> = None;
        let mut hidden: Vec<&str> = Vec::new();
        for (id, ratio) in batch {
            let Some(card) = self.mounted.get(id.as_str()) else {
                continue;
            };
            if *ratio >= self.threshold {
                let better = match winner {
                    None => true,
                    Some((_, best, order)) => {
                        *ratio > best || (*ratio == best && card.order < order)
                    }
                };
                if better {
                    winner = Some((id.as_str(), *ratio, card.order));
                }
            } else {
                hidden.push(id.as_str());
            }
        }

        let mut commands = Vec::new();
        if let Some((active, _, _)) = winner {
            let ids: Vec<String> = self.mounted.keys().cloned().collect();
            for id in ids {
                if id != active {
                    self.transition(&id, PlaybackState::Paused, &mut commands);
                }
            }
            let unmuted = self
                .mounted
                .get(active)
                .map(|card| card.unmuted)
                .unwrap_or(false);
            let target = if unmuted {
                PlaybackState::PlayingUnmuted
            } else {
                PlaybackState::PlayingMuted
            };
            self.transition(active, target, &mut commands);
        }
        for id in hidden {
            self.transition(id, PlaybackState::Paused, &mut commands);
        }
        commands
    }

    /// User toggled sound on a card. Unmuting a card clears the sound flag on
    /// every sibling, pauses whichever sibling was playing and starts the card
    /// if it was paused.
    pub fn toggle_sound(&mut self, video_id: &str) -> (SoundToggle, Vec<PlaybackCommand>) {
        let mut commands = Vec::new();
        let Some(card) = self.mounted.get(video_id) else {
            return (SoundToggle::Unknown, commands);
        };

        if card.unmuted {
            let next = if card.state.is_playing() {
                PlaybackState::PlayingMuted
            } else {
                PlaybackState::Paused
            };
            if let Some(card) = self.mounted.get_mut(video_id) {
                card.unmuted = false;
            }
            self.transition(video_id, next, &mut commands);
            return (SoundToggle::Off, commands);
        }

        let ids: Vec<String> = self.mounted.keys().cloned().collect();
        for id in ids {
            if id == video_id {
                continue;
            }
            let mut playing = false;
            if let Some(other) = self.mounted.get_mut(&id) {
                other.unmuted = false;
                playing = other.state.is_playing();
            }
            if playing {
                self.transition(&id, PlaybackState::Paused, &mut commands);
            }
        }
        if let Some(card) = self.mounted.get_mut(video_id) {
            card.unmuted = true;
        }
        self.transition(video_id, PlaybackState::PlayingUnmuted, &mut commands);
        (SoundToggle::On, commands)
    }

    fn transition(&mut self, video_id: &str, next: PlaybackState, out: &mut Vec<PlaybackCommand>) {
        let Some(card) = self.mounted.get_mut(video_id) else {
            return;
        };
        let prev = card.state;
        if prev == next {
            return;
        }
        card.state = next;
        let video_id = video_id.to_string();
        match (prev, next) {
            (_, PlaybackState::Paused) => out.push(PlaybackCommand::Pause { video_id }),
            (PlaybackState::Paused, playing) => out.push(PlaybackCommand::Play {
                video_id,
                src: card.src.clone(),
                muted: playing == PlaybackState::PlayingMuted,
            }),
            (_, playing) => out.push(PlaybackCommand::SetMuted {
                video_id,
                muted: playing == PlaybackState::PlayingMuted,
            }),
        }
    }
}
