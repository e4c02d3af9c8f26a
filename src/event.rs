//! Dispatchable channel-voice events.

use midi_msg::{Channel, ChannelVoiceMsg, ControlChange, MidiMsg};

/// A concrete dispatchable MIDI channel-voice event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: Channel,
    pub msg: ChannelVoiceMsg,
}

impl ChannelEvent {
    #[inline]
    pub fn new(channel: u8, msg: ChannelVoiceMsg) -> Self {
        Self {
            channel: Channel::from_u8(channel),
            msg,
        }
    }

    #[inline]
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Self {
        Self::new(channel, ChannelVoiceMsg::NoteOn { note: key, velocity })
    }

    #[inline]
    pub fn note_off(channel: u8, key: u8, velocity: u8) -> Self {
        Self::new(channel, ChannelVoiceMsg::NoteOff { note: key, velocity })
    }

    #[inline]
    pub fn control_change(channel: u8, control: u8, value: u8) -> Self {
        Self::new(
            channel,
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            },
        )
    }

    #[inline]
    pub fn pitch_bend(channel: u8, bend: u16) -> Self {
        Self::new(channel, ChannelVoiceMsg::PitchBend { bend })
    }

    #[inline]
    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::new(channel, ChannelVoiceMsg::ProgramChange { program })
    }

    #[inline]
    pub fn aftertouch(channel: u8, pressure: u8) -> Self {
        Self::new(channel, ChannelVoiceMsg::ChannelPressure { pressure })
    }

    #[inline]
    pub fn channel_num(&self) -> u8 {
        self.channel as u8
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.msg, ChannelVoiceMsg::NoteOn { velocity, .. } if velocity > 0)
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.msg,
            ChannelVoiceMsg::NoteOff { .. } | ChannelVoiceMsg::NoteOn { velocity: 0, .. }
        )
    }

    #[inline]
    pub fn key(&self) -> Option<u8> {
        match self.msg {
            ChannelVoiceMsg::NoteOn { note, .. }
            | ChannelVoiceMsg::NoteOff { note, .. }
            | ChannelVoiceMsg::PolyPressure { note, .. } => Some(note),
            _ => None,
        }
    }

    #[inline]
    pub fn to_midi_msg(&self) -> MidiMsg {
        MidiMsg::ChannelVoice {
            channel: self.channel,
            msg: self.msg,
        }
    }

    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_midi_msg().to_midi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let event = ChannelEvent::note_on(0, 60, 100);
        assert!(event.is_note_on());
        assert!(!event.is_note_off());
        assert_eq!(event.key(), Some(60));
        assert_eq!(event.channel_num(), 0);
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let event = ChannelEvent::note_on(0, 60, 0);
        assert!(event.is_note_off());
        assert!(!event.is_note_on());
    }

    #[test]
    fn test_note_off() {
        let event = ChannelEvent::note_off(3, 64, 0);
        assert!(event.is_note_off());
        assert_eq!(event.key(), Some(64));
        assert_eq!(event.channel_num(), 3);
    }

    #[test]
    fn test_control_change() {
        let event = ChannelEvent::control_change(5, 7, 127);
        assert_eq!(event.channel_num(), 5);
        match event.msg {
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            } => {
                assert_eq!(control, 7);
                assert_eq!(value, 127);
            }
            _ => panic!("Expected CC"),
        }
    }

    #[test]
    fn test_pitch_bend_center() {
        let event = ChannelEvent::pitch_bend(0, 8192);
        match event.msg {
            ChannelVoiceMsg::PitchBend { bend } => assert_eq!(bend, 8192),
            _ => panic!("Expected PitchBend"),
        }
    }

    #[test]
    fn test_to_bytes() {
        let bytes = ChannelEvent::note_on(0, 60, 100).to_bytes();
        assert_eq!(bytes, vec![0x90, 60, 100]);
    }
}
