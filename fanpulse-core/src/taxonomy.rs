//! Event taxonomy: the closed set of trackable actions and UI contexts.
//!
//! Actions are grouped by product domain. Each domain is its own enum so
//! `match` exhaustiveness stays readable; [`Action`] is the sum over them.
//!
//! The storage and wire form of an action is a flat snake_case name
//! (`play`, `nft_mint`, `dao_proposal_vote`). Names are unique across
//! domains, which keeps [`Action::from_str`](std::str::FromStr) unambiguous.

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Declares a domain enum with its storage names.
macro_rules! domain_actions {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Every action in this domain.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Returns the identifier used in storage and on the wire
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

domain_actions! {
    /// Account and navigation activity.
    PlatformAction {
        PageView => "page_view",
        View => "view",
        Signup => "signup",
        Login => "login",
        Logout => "logout",
        Search => "search",
        SearchClick => "search_click",
        Follow => "follow",
        Unfollow => "unfollow",
        ProfileUpdate => "profile_update",
        NotificationOpen => "notification_open",
        SessionStart => "session_start",
        SessionEnd => "session_end",
    }
}

domain_actions! {
    /// Listening and library activity.
    MusicAction {
        Play => "play",
        Pause => "pause",
        Skip => "skip",
        Complete => "complete",
        Like => "like",
        Unlike => "unlike",
        Share => "share",
        Save => "save",
        Download => "download",
        Comment => "comment",
        PlaylistCreate => "playlist_create",
        PlaylistAdd => "playlist_add",
        PlaylistRemove => "playlist_remove",
        Upload => "upload",
    }
}

domain_actions! {
    /// Cart, checkout and merchandise.
    CommerceAction {
        AddToCart => "add_to_cart",
        RemoveFromCart => "remove_from_cart",
        CheckoutStart => "checkout_start",
        Purchase => "purchase",
        MerchPurchase => "merch_purchase",
        Refund => "refund",
        Tip => "tip",
    }
}

domain_actions! {
    /// Fan subscriptions to artists.
    SubscriptionAction {
        Subscribe => "subscribe",
        SubscriptionRenew => "subscription_renew",
        SubscriptionUpgrade => "subscription_upgrade",
        SubscriptionDowngrade => "subscription_downgrade",
        SubscriptionCancel => "subscription_cancel",
    }
}

domain_actions! {
    /// Live events, tickets and streams.
    LiveEventAction {
        EventView => "event_view",
        EventRsvp => "event_rsvp",
        TicketPurchase => "ticket_purchase",
        EventCheckIn => "event_check_in",
        LivestreamJoin => "livestream_join",
        LivestreamLeave => "livestream_leave",
    }
}

domain_actions! {
    /// Ad delivery and payouts.
    AdAction {
        AdImpression => "ad_impression",
        AdClick => "ad_click",
        AdConversion => "ad_conversion",
        AdBid => "ad_bid",
        AdRevenue => "ad_revenue",
        AdSkip => "ad_skip",
    }
}

domain_actions! {
    /// NFT marketplace activity. Settlement happens on chain.
    NftAction {
        NftView => "nft_view",
        NftMint => "nft_mint",
        NftList => "nft_list",
        NftDelist => "nft_delist",
        NftBid => "nft_bid",
        NftPurchase => "nft_purchase",
        NftTransfer => "nft_transfer",
        NftOffer => "nft_offer",
        NftOfferAccept => "nft_offer_accept",
        NftRoyaltyPaid => "nft_royalty_paid",
    }
}

domain_actions! {
    /// Fan club membership and content.
    FanClubAction {
        FanClubJoin => "fan_club_join",
        FanClubLeave => "fan_club_leave",
        FanClubPost => "fan_club_post",
        FanClubComment => "fan_club_comment",
        FanClubTierUpgrade => "fan_club_tier_upgrade",
        ExclusiveContentView => "exclusive_content_view",
    }
}

domain_actions! {
    /// DAO governance.
    GovernanceAction {
        DaoJoin => "dao_join",
        DaoProposalCreate => "dao_proposal_create",
        DaoProposalVote => "dao_proposal_vote",
        DaoProposalExecute => "dao_proposal_execute",
        DaoDelegate => "dao_delegate",
        DaoTreasuryDeposit => "dao_treasury_deposit",
        DaoTreasuryWithdraw => "dao_treasury_withdraw",
    }
}

domain_actions! {
    /// Wallets and bridges.
    CrossChainAction {
        WalletConnect => "wallet_connect",
        WalletDisconnect => "wallet_disconnect",
        ChainSwitch => "chain_switch",
        BridgeInitiate => "bridge_initiate",
        BridgeComplete => "bridge_complete",
        BridgeFail => "bridge_fail",
    }
}

domain_actions! {
    /// Loyalty points, rewards and referrals.
    LoyaltyAction {
        LoyaltyPointsEarned => "loyalty_points_earned",
        LoyaltyPointsRedeemed => "loyalty_points_redeemed",
        LoyaltyTierUpgrade => "loyalty_tier_upgrade",
        LoyaltyRewardClaim => "loyalty_reward_claim",
        LoyaltyStreakBonus => "loyalty_streak_bonus",
        ReferralSent => "referral_sent",
        ReferralConverted => "referral_converted",
    }
}

/// A trackable action, scoped by domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Platform(PlatformAction),
    Music(MusicAction),
    Commerce(CommerceAction),
    Subscription(SubscriptionAction),
    LiveEvent(LiveEventAction),
    Ad(AdAction),
    Nft(NftAction),
    FanClub(FanClubAction),
    Governance(GovernanceAction),
    CrossChain(CrossChainAction),
    Loyalty(LoyaltyAction),
}

impl Action {
    // Shorthands for the actions the aggregations filter on.
    pub const PLAY: Action = Action::Music(MusicAction::Play);
    pub const LIKE: Action = Action::Music(MusicAction::Like);
    pub const UNLIKE: Action = Action::Music(MusicAction::Unlike);
    pub const SHARE: Action = Action::Music(MusicAction::Share);
    pub const VIEW: Action = Action::Platform(PlatformAction::View);
    pub const SIGNUP: Action = Action::Platform(PlatformAction::Signup);
    pub const SEARCH: Action = Action::Platform(PlatformAction::Search);
    pub const FOLLOW: Action = Action::Platform(PlatformAction::Follow);
    pub const UNFOLLOW: Action = Action::Platform(PlatformAction::Unfollow);
    pub const NFT_BID: Action = Action::Nft(NftAction::NftBid);

    /// Returns the identifier used in storage and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Platform(a) => a.as_str(),
            Action::Music(a) => a.as_str(),
            Action::Commerce(a) => a.as_str(),
            Action::Subscription(a) => a.as_str(),
            Action::LiveEvent(a) => a.as_str(),
            Action::Ad(a) => a.as_str(),
            Action::Nft(a) => a.as_str(),
            Action::FanClub(a) => a.as_str(),
            Action::Governance(a) => a.as_str(),
            Action::CrossChain(a) => a.as_str(),
            Action::Loyalty(a) => a.as_str(),
        }
    }

    /// Returns the domain name (`music`, `nft`, ...)
    pub fn domain(&self) -> &'static str {
        match self {
            Action::Platform(_) => "platform",
            Action::Music(_) => "music",
            Action::Commerce(_) => "commerce",
            Action::Subscription(_) => "subscription",
            Action::LiveEvent(_) => "live_event",
            Action::Ad(_) => "ad",
            Action::Nft(_) => "nft",
            Action::FanClub(_) => "fan_club",
            Action::Governance(_) => "governance",
            Action::CrossChain(_) => "cross_chain",
            Action::Loyalty(_) => "loyalty",
        }
    }

    /// Every action across all domains.
    pub fn all() -> impl Iterator<Item = Action> {
        PlatformAction::ALL
            .iter()
            .copied()
            .map(Action::Platform)
            .chain(MusicAction::ALL.iter().copied().map(Action::Music))
            .chain(CommerceAction::ALL.iter().copied().map(Action::Commerce))
            .chain(SubscriptionAction::ALL.iter().copied().map(Action::Subscription))
            .chain(LiveEventAction::ALL.iter().copied().map(Action::LiveEvent))
            .chain(AdAction::ALL.iter().copied().map(Action::Ad))
            .chain(NftAction::ALL.iter().copied().map(Action::Nft))
            .chain(FanClubAction::ALL.iter().copied().map(Action::FanClub))
            .chain(GovernanceAction::ALL.iter().copied().map(Action::Governance))
            .chain(CrossChainAction::ALL.iter().copied().map(Action::CrossChain))
            .chain(LoyaltyAction::ALL.iter().copied().map(Action::Loyalty))
    }

    /// Whether the event's `value` is money paid by a fan.
    ///
    /// Used for the per-day revenue series. User metrics intentionally do
    /// not use this (they sum every `value`).
    pub fn is_revenue(&self) -> bool {
        matches!(
            self,
            Action::Commerce(CommerceAction::Purchase)
                | Action::Commerce(CommerceAction::MerchPurchase)
                | Action::Commerce(CommerceAction::Tip)
                | Action::Subscription(SubscriptionAction::Subscribe)
                | Action::Subscription(SubscriptionAction::SubscriptionRenew)
                | Action::Subscription(SubscriptionAction::SubscriptionUpgrade)
                | Action::LiveEvent(LiveEventAction::TicketPurchase)
                | Action::Nft(NftAction::NftPurchase)
        )
    }

    /// Actions counted as purchases in user metrics.
    pub fn is_purchase(&self) -> bool {
        matches!(
            self,
            Action::Commerce(CommerceAction::Purchase)
                | Action::Commerce(CommerceAction::MerchPurchase)
                | Action::LiveEvent(LiveEventAction::TicketPurchase)
                | Action::Nft(NftAction::NftPurchase)
        )
    }

    /// Storage names of every action matching `pred`, for SQL `IN` lists.
    pub fn names_where(pred: impl Fn(&Action) -> bool) -> Vec<&'static str> {
        Action::all().filter(|a| pred(a)).map(|a| a.as_str()).collect()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformAction::parse(s)
            .map(Action::Platform)
            .or_else(|| MusicAction::parse(s).map(Action::Music))
            .or_else(|| CommerceAction::parse(s).map(Action::Commerce))
            .or_else(|| SubscriptionAction::parse(s).map(Action::Subscription))
            .or_else(|| LiveEventAction::parse(s).map(Action::LiveEvent))
            .or_else(|| AdAction::parse(s).map(Action::Ad))
            .or_else(|| NftAction::parse(s).map(Action::Nft))
            .or_else(|| FanClubAction::parse(s).map(Action::FanClub))
            .or_else(|| GovernanceAction::parse(s).map(Action::Governance))
            .or_else(|| CrossChainAction::parse(s).map(Action::CrossChain))
            .or_else(|| LoyaltyAction::parse(s).map(Action::Loyalty))
            .ok_or_else(|| Error::InvalidAction(s.to_string()))
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// UI surface an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    Home,
    Profile,
    Discover,
    Player,
    Checkout,
    Search,
    ArtistPage,
    SongPage,
    Playlist,
    Library,
    MerchStore,
    EventPage,
    NftMarketplace,
    FanClub,
    Dao,
    Wallet,
    Loyalty,
    Admin,
    Notification,
    External,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Home => "home",
            Context::Profile => "profile",
            Context::Discover => "discover",
            Context::Player => "player",
            Context::Checkout => "checkout",
            Context::Search => "search",
            Context::ArtistPage => "artist_page",
            Context::SongPage => "song_page",
            Context::Playlist => "playlist",
            Context::Library => "library",
            Context::MerchStore => "merch_store",
            Context::EventPage => "event_page",
            Context::NftMarketplace => "nft_marketplace",
            Context::FanClub => "fan_club",
            Context::Dao => "dao",
            Context::Wallet => "wallet",
            Context::Loyalty => "loyalty",
            Context::Admin => "admin",
            Context::Notification => "notification",
            Context::External => "external",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| Error::InvalidContext(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_action_names_unique_across_domains() {
        let mut seen = HashSet::new();
        for action in Action::all() {
            assert!(
                seen.insert(action.as_str()),
                "duplicate action name {}",
                action.as_str()
            );
        }
        assert!(seen.len() >= 85, "taxonomy shrank to {}", seen.len());
    }

    #[test]
    fn test_every_action_parses_back() {
        for action in Action::all() {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(matches!(
            "teleport".parse::<Action>(),
            Err(Error::InvalidAction(name)) if name == "teleport"
        ));
    }

    #[test]
    fn test_action_serde_uses_flat_name() {
        let json = serde_json::to_string(&Action::Governance(GovernanceAction::DaoProposalVote))
            .unwrap();
        assert_eq!(json, "\"dao_proposal_vote\"");

        let parsed: Action = serde_json::from_str("\"loyalty_points_earned\"").unwrap();
        assert_eq!(parsed, Action::Loyalty(LoyaltyAction::LoyaltyPointsEarned));
        assert_eq!(parsed.domain(), "loyalty");

        assert!(serde_json::from_str::<Action>("\"nope\"").is_err());
    }

    #[test]
    fn test_context_parse() {
        assert_eq!("artist_page".parse::<Context>().unwrap(), Context::ArtistPage);
        assert_eq!(Context::NftMarketplace.as_str(), "nft_marketplace");
        assert!("moon".parse::<Context>().is_err());
    }

    #[test]
    fn test_revenue_and_purchase_sets() {
        assert!(Action::Commerce(CommerceAction::MerchPurchase).is_revenue());
        assert!(Action::Commerce(CommerceAction::MerchPurchase).is_purchase());
        assert!(Action::Subscription(SubscriptionAction::Subscribe).is_revenue());
        assert!(!Action::Subscription(SubscriptionAction::Subscribe).is_purchase());
        assert!(!Action::PLAY.is_revenue());

        let names = Action::names_where(Action::is_purchase);
        assert!(names.contains(&"ticket_purchase"));
        assert!(!names.contains(&"refund"));
    }
}
