use log::{info, warn};
use rand::Rng;
use shared::{
    ClickStats, Phase, PlayerInfo, ServerEvent, Team, BOT_CLICK_PROBABILITY, DEFAULT_MAX_GAUGE,
    LATENCY_WINDOW_MS, MIN_MAX_GAUGE,
};

/// Server-side roster entry. Click history keeps raw timestamps so a match
/// can be audited after the fact.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub team: Team,
    pub score: u32,
    pub is_bot: bool,
    pub click_history: Vec<u64>,
}

impl Player {
    fn new(id: String, name: String, team: Team, is_bot: bool) -> Self {
        Player {
            id,
            name,
            team,
            score: 0,
            is_bot,
            click_history: Vec::new(),
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            team: self.team,
            score: self.score,
            is_bot: self.is_bot,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TeamState {
    gauge: u32,
    players: Vec<Player>,
}

/// What happened to a single click, so the caller can decide whether and how
/// to notify observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Gauge and score advanced by one.
    Validated,
    /// The click that filled the gauge and ended the match.
    Victory(Team),
    /// Counted but not applied: the team gauge was already full.
    RejectedFull,
    /// Counted as a late arrival inside the post-victory latency window.
    RejectedLate,
    /// Dropped without touching any counter.
    Ignored,
}

/// Result of one bot simulation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BotSweep {
    pub clicks: u32,
    pub victory: Option<Team>,
}

/// Authoritative match state. All mutation goes through the command methods;
/// callers supply timestamps so the rules stay independent of wall clocks.
pub struct GameState {
    phase: Phase,
    team_a: TeamState,
    team_b: TeamState,
    max_gauge: u32,
    winner: Option<Team>,
    victory_at: Option<u64>,
    click_stats: ClickStats,
    next_bot_id: u64,
}

impl GameState {
    pub fn new() -> Self {
        Self::with_max_gauge(DEFAULT_MAX_GAUGE)
    }

    pub fn with_max_gauge(max_gauge: u32) -> Self {
        GameState {
            phase: Phase::Lobby,
            team_a: TeamState::default(),
            team_b: TeamState::default(),
            max_gauge,
            winner: None,
            victory_at: None,
            click_stats: ClickStats::default(),
            next_bot_id: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    pub fn victory_at(&self) -> Option<u64> {
        self.victory_at
    }

    pub fn max_gauge(&self) -> u32 {
        self.max_gauge
    }

    pub fn click_stats(&self) -> ClickStats {
        self.click_stats
    }

    pub fn gauge(&self, team: Team) -> u32 {
        self.team(team).gauge
    }

    pub fn roster_len(&self, team: Team) -> usize {
        self.team(team).players.len()
    }

    pub fn player_count(&self) -> usize {
        self.team_a.players.len() + self.team_b.players.len()
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.team_a
            .players
            .iter()
            .chain(self.team_b.players.iter())
            .find(|p| p.id == id)
    }

    fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.team_a
            .players
            .iter_mut()
            .chain(self.team_b.players.iter_mut())
            .find(|p| p.id == id)
    }

    fn team(&self, team: Team) -> &TeamState {
        match team {
            Team::A => &self.team_a,
            Team::B => &self.team_b,
        }
    }

    fn team_mut(&mut self, team: Team) -> &mut TeamState {
        match team {
            Team::A => &mut self.team_a,
            Team::B => &mut self.team_b,
        }
    }

    /// Roster snapshot in join order, team A first.
    pub fn players(&self) -> Vec<PlayerInfo> {
        self.team_a
            .players
            .iter()
            .chain(self.team_b.players.iter())
            .map(Player::info)
            .collect()
    }

    /// Team the next unassigned player lands on. Ties go to team A.
    pub fn auto_balance(&self) -> Team {
        if self.team_b.players.len() < self.team_a.players.len() {
            Team::B
        } else {
            Team::A
        }
    }

    /// Adds a player to the balanced team, or refreshes the existing record
    /// when the id is already on a roster. Re-joining keeps the old team slot
    /// but starts from a clean score.
    pub fn join(&mut self, player_id: &str, name: &str) -> Team {
        let display_name = if name.trim().is_empty() {
            format!("Player {}", self.player_count() + 1)
        } else {
            name.to_string()
        };

        if let Some(existing) = self.player_mut(player_id) {
            let team = existing.team;
            let is_bot = existing.is_bot;
            *existing = Player::new(player_id.to_string(), display_name.clone(), team, is_bot);
            info!(
                "Player {} ({}) re-joined team {}",
                display_name, player_id, team
            );
            return team;
        }

        let team = self.auto_balance();
        self.team_mut(team).players.push(Player::new(
            player_id.to_string(),
            display_name.clone(),
            team,
            false,
        ));
        info!("Player {} ({}) joined team {}", display_name, player_id, team);
        team
    }

    /// Removes a player regardless of team. Returns whether anything changed.
    pub fn remove_player(&mut self, id: &str) -> bool {
        let before = self.player_count();
        self.team_a.players.retain(|p| p.id != id);
        self.team_b.players.retain(|p| p.id != id);
        before != self.player_count()
    }

    /// Creates a server-driven bot. Name and team fall back to a generated
    /// name and the balanced team. Returns the generated id and final team.
    pub fn add_bot(&mut self, name: Option<String>, team: Option<Team>) -> (String, Team) {
        self.next_bot_id += 1;
        let id = format!("bot_{}", self.next_bot_id);
        let name = match name {
            Some(n) if !n.trim().is_empty() => n,
            _ => format!("Bot {}", self.player_count() + 1),
        };
        let team = team.unwrap_or_else(|| self.auto_balance());

        info!("Bot {} ({}) added to team {}", name, id, team);
        self.team_mut(team)
            .players
            .push(Player::new(id.clone(), name, team, true));
        (id, team)
    }

    /// Removes a bot by id. Human players are never removable this way.
    pub fn remove_bot(&mut self, bot_id: &str) -> Option<String> {
        match self.player(bot_id) {
            Some(player) if player.is_bot => {
                let name = player.name.clone();
                self.remove_player(bot_id);
                info!("Bot {} ({}) removed", name, bot_id);
                Some(name)
            }
            _ => {
                warn!("Ignoring remove_bot for unknown or non-bot id {}", bot_id);
                None
            }
        }
    }

    /// Applies one click attempt at `now_ms`. This is the single validation
    /// path for humans and bots alike.
    pub fn click(&mut self, player_id: &str, now_ms: u64) -> ClickOutcome {
        if self.phase == Phase::Victory {
            // Clicks already in flight when the match ended are counted for
            // the post-game audit, but only within the latency window.
            if let Some(victory_at) = self.victory_at {
                if now_ms.saturating_sub(victory_at) < LATENCY_WINDOW_MS {
                    self.click_stats.total += 1;
                    self.click_stats.rejected += 1;
                    return ClickOutcome::RejectedLate;
                }
            }
            return ClickOutcome::Ignored;
        }

        if self.phase != Phase::Playing {
            return ClickOutcome::Ignored;
        }

        let team = match self.player(player_id) {
            Some(player) => player.team,
            None => {
                warn!("Click from unknown player {}", player_id);
                return ClickOutcome::Ignored;
            }
        };

        self.click_stats.total += 1;

        // Reachable when update_config lowered the target below a live gauge.
        if self.team(team).gauge >= self.max_gauge {
            self.click_stats.rejected += 1;
            return ClickOutcome::RejectedFull;
        }

        self.team_mut(team).gauge += 1;
        self.click_stats.validated += 1;
        if let Some(player) = self.player_mut(player_id) {
            player.score += 1;
            player.click_history.push(now_ms);
        }

        if self.team(team).gauge >= self.max_gauge {
            self.declare_victory(team, now_ms);
            return ClickOutcome::Victory(team);
        }

        ClickOutcome::Validated
    }

    fn declare_victory(&mut self, team: Team, now_ms: u64) {
        self.phase = Phase::Victory;
        self.winner = Some(team);
        self.victory_at = Some(now_ms);
        info!(
            "Team {} wins with {} validated of {} total clicks ({} rejected)",
            team, self.click_stats.validated, self.click_stats.total, self.click_stats.rejected
        );
    }

    /// Runs one bot pass: every bot rolls independently and clicks through
    /// the normal validation path. A victory mid-pass silences the rest.
    pub fn simulate_bot_clicks(&mut self, now_ms: u64, rng: &mut impl Rng) -> BotSweep {
        let mut sweep = BotSweep::default();
        if self.phase != Phase::Playing {
            return sweep;
        }

        let bot_ids: Vec<String> = self
            .team_a
            .players
            .iter()
            .chain(self.team_b.players.iter())
            .filter(|p| p.is_bot)
            .map(|p| p.id.clone())
            .collect();

        for bot_id in bot_ids {
            if self.phase != Phase::Playing {
                break;
            }
            if !rng.gen_bool(BOT_CLICK_PROBABILITY) {
                continue;
            }
            match self.click(&bot_id, now_ms) {
                ClickOutcome::Validated => sweep.clicks += 1,
                ClickOutcome::Victory(team) => {
                    sweep.clicks += 1;
                    sweep.victory = Some(team);
                }
                _ => {}
            }
        }
        sweep
    }

    /// Starts (or restarts) a match. All per-match state is wiped in the same
    /// step the phase flips, so no observer ever sees stale scores.
    pub fn start(&mut self) {
        self.clear_match_state();
        self.phase = Phase::Playing;
        info!("Match started, first team to {} wins", self.max_gauge);
    }

    /// Returns to the lobby, keeping rosters but wiping match progress.
    pub fn reset(&mut self) {
        self.clear_match_state();
        self.phase = Phase::Lobby;
        info!("Match reset to lobby");
    }

    fn clear_match_state(&mut self) {
        self.team_a.gauge = 0;
        self.team_b.gauge = 0;
        self.winner = None;
        self.victory_at = None;
        self.click_stats = ClickStats::default();
        for player in self
            .team_a
            .players
            .iter_mut()
            .chain(self.team_b.players.iter_mut())
        {
            player.score = 0;
            player.click_history.clear();
        }
    }

    /// Applies a config change. Values below the floor are ignored and leave
    /// the running config untouched. Mid-match updates are allowed.
    pub fn update_config(&mut self, max_gauge: u32) -> bool {
        if max_gauge < MIN_MAX_GAUGE {
            warn!(
                "Ignoring maxGauge update to {} (floor is {})",
                max_gauge, MIN_MAX_GAUGE
            );
            return false;
        }
        info!("maxGauge updated: {} -> {}", self.max_gauge, max_gauge);
        self.max_gauge = max_gauge;
        true
    }

    pub fn state_update(&self, now_ms: u64) -> ServerEvent {
        ServerEvent::StateUpdate {
            team_a_gauge: self.team_a.gauge,
            team_b_gauge: self.team_b.gauge,
            max_gauge: self.max_gauge,
            players: self.players(),
            phase: self.phase,
            timestamp: now_ms,
        }
    }

    pub fn lobby_update(&self, now_ms: u64) -> ServerEvent {
        ServerEvent::LobbyUpdate {
            players: self.players(),
            phase: self.phase,
            max_gauge: self.max_gauge,
            timestamp: now_ms,
        }
    }

    pub fn victory_event(&self, winner: Team, now_ms: u64) -> ServerEvent {
        ServerEvent::Victory {
            winner,
            final_scores: self.players(),
            click_stats: self.click_stats,
            latency_window_ms: LATENCY_WINDOW_MS,
            timestamp: now_ms,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
