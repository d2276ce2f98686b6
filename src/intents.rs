//! Gateway intents: the bitmask sent at identify time that tells Discord
//! which dispatch events this connection wants to receive.
//!
//! See: <https://discord.com/developers/docs/topics/gateway#gateway-intents>

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// A bitmask of gateway intents.
    ///
    /// Two bit positions have disagreed across revisions of Discord's own
    /// documentation: [`GUILD_PRESENCES`] and [`GUILD_MESSAGES`]. This crate
    /// uses the canonical values, bit 8 and bit 9 respectively.
    ///
    /// [`GUILD_PRESENCES`]: Self::GUILD_PRESENCES
    /// [`GUILD_MESSAGES`]: Self::GUILD_MESSAGES
    #[derive(Default)]
    pub struct Intents: u16 {
        /// Guild create/update/delete, role and channel changes.
        const GUILDS = 1 << 0;
        /// Member join/update/remove. Privileged.
        const GUILD_MEMBERS = 1 << 1;
        /// Guild ban add/remove.
        const GUILD_BANS = 1 << 2;
        /// Emoji and sticker updates.
        const GUILD_EMOJIS = 1 << 3;
        /// Integration updates.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Webhook updates.
        const GUILD_WEBHOOKS = 1 << 5;
        /// Invite create/delete.
        const GUILD_INVITES = 1 << 6;
        /// Voice state updates.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Presence updates. Privileged.
        const GUILD_PRESENCES = 1 << 8;
        /// Messages in guilds.
        const GUILD_MESSAGES = 1 << 9;
        /// Message reactions in guilds.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Typing indicators in guilds.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Direct messages.
        const DIRECT_MESSAGES = 1 << 12;
        /// Direct message reactions.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing indicators.
        const DIRECT_MESSAGE_TYPING = 1 << 14;

        /// All privileged intents, which require approval once a bot is in
        /// 100 or more guilds.
        const PRIVILEGED = Self::GUILD_MEMBERS.bits | Self::GUILD_PRESENCES.bits;

        /// Every intent defined above.
        const ALL = Self::GUILDS.bits
            | Self::GUILD_MEMBERS.bits
            | Self::GUILD_BANS.bits
            | Self::GUILD_EMOJIS.bits
            | Self::GUILD_INTEGRATIONS.bits
            | Self::GUILD_WEBHOOKS.bits
            | Self::GUILD_INVITES.bits
            | Self::GUILD_VOICE_STATES.bits
            | Self::GUILD_PRESENCES.bits
            | Self::GUILD_MESSAGES.bits
            | Self::GUILD_MESSAGE_REACTIONS.bits
            | Self::GUILD_MESSAGE_TYPING.bits
            | Self::DIRECT_MESSAGES.bits
            | Self::DIRECT_MESSAGE_REACTIONS.bits
            | Self::DIRECT_MESSAGE_TYPING.bits;

        /// [`ALL`] with every [`PRIVILEGED`] bit cleared.
        ///
        /// [`ALL`]: Self::ALL
        /// [`PRIVILEGED`]: Self::PRIVILEGED
        const NON_PRIVILEGED = Self::ALL.bits & !Self::PRIVILEGED.bits;
    }
}

impl Intents {
    /// The set of intents this crate requests when a caller hasn't
    /// configured any: enough to run a typical guild bot without opting
    /// into either privileged intent.
    #[must_use]
    pub const fn recommended() -> Self {
        Self::from_bits_truncate(
            Self::GUILDS.bits
                | Self::GUILD_MESSAGES.bits
                | Self::GUILD_BANS.bits
                | Self::GUILD_EMOJIS.bits
                | Self::GUILD_INVITES.bits
                | Self::GUILD_VOICE_STATES.bits
                | Self::DIRECT_MESSAGES.bits,
        )
    }
}

impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u16::deserialize(deserializer)?;

        Ok(Self::from_bits_truncate(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::Intents;

    #[test]
    fn privileged_bits_match_canonical_positions() {
        assert_eq!(Intents::GUILD_PRESENCES.bits(), 1 << 8);
        assert_eq!(Intents::GUILD_MESSAGES.bits(), 1 << 9);
    }

    #[test]
    fn non_privileged_excludes_privileged() {
        assert!(!Intents::NON_PRIVILEGED.contains(Intents::GUILD_MEMBERS));
        assert!(!Intents::NON_PRIVILEGED.contains(Intents::GUILD_PRESENCES));
        assert!(Intents::NON_PRIVILEGED.contains(Intents::GUILDS));
    }

    #[test]
    fn all_is_privileged_union_non_privileged() {
        assert_eq!(Intents::ALL, Intents::PRIVILEGED | Intents::NON_PRIVILEGED);
    }

    #[test]
    fn recommended_default_matches_spec() {
        let expected = Intents::GUILDS
            | Intents::GUILD_MESSAGES
            | Intents::GUILD_BANS
            | Intents::GUILD_EMOJIS
            | Intents::GUILD_INVITES
            | Intents::GUILD_VOICE_STATES
            | Intents::DIRECT_MESSAGES;

        assert_eq!(Intents::recommended(), expected);
    }
}
