//! Steam Web API request construction
//!
//! Requests are plain GETs against `api.steampowered.com`; every method lives
//! under a fixed versioned path and takes its arguments as query parameters.

use std::fmt;
use url::Url;

use crate::utils::error::FetchError;

/// Production API endpoint
pub const STEAM_API_BASE: &str = "https://api.steampowered.com";

/// Steam Web API methods used for Dota 2 data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SteamMethod {
    GetMatchHistory,
    GetMatchDetails,
    GetHeroes,
    GetPlayerSummaries,
    EconomySchema,
    GetLeagueListing,
    GetLiveLeagueGames,
    GetMatchHistoryBySequenceNum,
    GetTeamInfoByTeamId,
}

impl SteamMethod {
    /// Versioned request path
    pub fn path(&self) -> &'static str {
        match self {
            Self::GetMatchHistory => "/IDOTA2Match_570/GetMatchHistory/V001/",
            Self::GetMatchDetails => "/IDOTA2Match_570/GetMatchDetails/v001/",
            Self::GetHeroes => "/IEconDOTA2_570/GetHeroes/v0001/",
            Self::GetPlayerSummaries => "/ISteamUser/GetPlayerSummaries/v0002/",
            Self::EconomySchema => "/IEconItems_570/GetSchema/v0001/",
            Self::GetLeagueListing => "/IDOTA2Match_570/GetLeagueListing/v0001/",
            Self::GetLiveLeagueGames => "/IDOTA2Match_570/GetLiveLeagueGames/v0001/",
            Self::GetMatchHistoryBySequenceNum => {
                "/IDOTA2Match_570/GetMatchHistoryBySequenceNum/v001/"
            }
            Self::GetTeamInfoByTeamId => "/IDOTA2Match_570/GetTeamInfoByTeamID/v001/",
        }
    }
}

impl fmt::Display for SteamMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Query arguments accepted by the API methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiArgument {
    HeroId(u32),
    GameMode(u32),
    Skill(u32),
    MinPlayers(u32),
    AccountId(u64),
    LeagueId(u32),
    StartAtMatchId(u64),
    StartAtMatchSeqNum(u64),
    MatchesRequested(u32),
    TournamentGamesOnly,
    Raw(String, String),
}

impl ApiArgument {
    /// Query parameter name and value
    pub fn pair(&self) -> (&str, String) {
        match self {
            Self::HeroId(v) => ("hero_id", v.to_string()),
            Self::GameMode(v) => ("game_mode", v.to_string()),
            Self::Skill(v) => ("skill", v.to_string()),
            Self::MinPlayers(v) => ("min_players", v.to_string()),
            Self::AccountId(v) => ("account_id", v.to_string()),
            Self::LeagueId(v) => ("league_id", v.to_string()),
            Self::StartAtMatchId(v) => ("start_at_match_id", v.to_string()),
            Self::StartAtMatchSeqNum(v) => ("start_at_match_seq_num", v.to_string()),
            Self::MatchesRequested(v) => ("matches_requested", v.to_string()),
            Self::TournamentGamesOnly => ("tournament_games_only", "true".to_string()),
            Self::Raw(key, value) => (key.as_str(), value.clone()),
        }
    }
}

/// Builds authenticated request URLs
#[derive(Clone)]
pub struct SteamApi {
    key: String,
    base_url: String,
}

impl SteamApi {
    /// API client against the production endpoint
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_url: STEAM_API_BASE.to_string(),
        }
    }

    /// API client against a custom endpoint (used with mock servers)
    pub fn with_base_url(key: impl Into<String>, base_url: &str) -> Result<Self, FetchError> {
        let parsed =
            Url::parse(base_url).map_err(|e| FetchError::InvalidUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(FetchError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            key: key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full request URL for `method` with `arguments`; the key is always set
    pub fn request_url(
        &self,
        method: SteamMethod,
        arguments: &[ApiArgument],
    ) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, method.path()))
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            for argument in arguments {
                let (key, value) = argument.pair();
                query.append_pair(key, &value);
            }
            query.append_pair("key", &self.key);
        }

        Ok(url)
    }
}

impl fmt::Debug for SteamApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteamApi")
            .field("key", &crate::utils::mask_secret(&self.key))
            .field("base_url", &self.base_url)
            .finish()
    }
}
