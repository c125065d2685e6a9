//! Local player attachment and round start

use std::str::FromStr;

use rand::Rng;
use tracing::{debug, info};

use crate::store::{Member, RecordId, Role};

use super::schema::{new_player_fields, random_color, GameSnapshot, GameStatus};
use super::session::GameHandle;
use super::GameError;

/// Who may start the round when joining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElectionPolicy {
    /// Only the session creator, and only while the game is waiting.
    /// At most one participant ever elects.
    #[default]
    CreatorOnly,
    /// Any joiner holding admin on the Game. Concurrent joiners can both
    /// elect; the store settles on one `currentIt`.
    AdminAndNonEmpty,
}

impl FromStr for ElectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator_only" => Ok(ElectionPolicy::CreatorOnly),
            "admin_and_non_empty" => Ok(ElectionPolicy::AdminAndNonEmpty),
            other => Err(format!("unknown election policy `{}`", other)),
        }
    }
}

/// Where the local participant stands after an attach attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// The players list is not fully loaded yet; nothing was written
    Pending,
    /// A player owned by this account was already listed
    Bound(RecordId),
    /// A new player was created and appended
    Created { player: RecordId, elected: bool },
}

impl Attachment {
    pub fn player(&self) -> Option<RecordId> {
        match self {
            Attachment::Pending => None,
            Attachment::Bound(player) | Attachment::Created { player, .. } => Some(*player),
        }
    }
}

/// Create a player record in its own group, readable by everyone and
/// writable only by the local account
pub fn create_player(game: &GameHandle, color: String) -> Result<RecordId, GameError> {
    let replica = game.replica();
    let group = replica.create_group();
    replica.grant(group, Member::Everyone, Role::Reader)?;
    Ok(replica.create_map(group, new_player_fields(color))?)
}

/// Bind the local account to its player in `snapshot`, creating and
/// appending one if absent
///
/// Only acts on a fully loaded players list: an unresolved entry may be
/// this account's own player, and creating a second one would be
/// permanent.
pub fn attach_local_player(
    game: &GameHandle,
    snapshot: &GameSnapshot,
    rng: &mut impl Rng,
    policy: ElectionPolicy,
) -> Result<Attachment, GameError> {
    if !snapshot.players_loaded() {
        return Ok(Attachment::Pending);
    }

    let replica = game.replica();
    let me = replica.account();
    if let Some(existing) = snapshot.player_owned_by(me) {
        debug!(game_id = %game.id(), player_id = %existing.id, "Bound existing player");
        return Ok(Attachment::Bound(existing.id));
    }

    // Group permissions can trail the list by a delivery.
    if replica.role_of(snapshot.players_list) < Some(Role::Writer) {
        return Ok(Attachment::Pending);
    }

    let player = create_player(game, random_color(rng))?;
    game.append_player(snapshot.players_list, player)?;
    info!(
        game_id = %game.id(),
        player_id = %player,
        account_id = %me,
        position = snapshot.slots().len(),
        "Player joined"
    );

    let elected = match policy {
        ElectionPolicy::CreatorOnly => {
            snapshot.creator == me && snapshot.status == GameStatus::Waiting
        }
        // The new entry makes the list non-empty.
        ElectionPolicy::AdminAndNonEmpty => game.can_admin(),
    };
    if elected {
        game.write_status(GameStatus::Playing)?;
        game.write_current_it(player)?;
        info!(game_id = %game.id(), player_id = %player, "Round started");
    }

    Ok(Attachment::Created { player, elected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::session::LoadDepth;
    use crate::game::testing::Table;
    use crate::store::{AccountId, Replica};
    use glam::Vec3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn policy_names_parse() {
        assert_eq!("creator_only".parse(), Ok(ElectionPolicy::CreatorOnly));
        assert_eq!(
            "admin_and_non_empty".parse(),
            Ok(ElectionPolicy::AdminAndNonEmpty)
        );
        assert!("anyone".parse::<ElectionPolicy>().is_err());
    }

    #[test]
    fn creator_joining_starts_the_round() {
        let table = Table::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let snapshot = table.snapshot(&table.creator);

        let attached =
            attach_local_player(&table.creator, &snapshot, &mut rng, ElectionPolicy::CreatorOnly)
                .unwrap();
        let Attachment::Created { player, elected } = attached else {
            panic!("expected a new player, got {:?}", attached);
        };
        assert!(elected);

        let after = table.snapshot(&table.creator);
        assert_eq!(after.status, GameStatus::Playing);
        assert_eq!(after.current_it, Some(player));
        let me = after.player(player).unwrap();
        assert_eq!(me.position, Vec3::new(0.0, 6.0, 1.0));
        assert_eq!(me.name, "Player");
    }

    #[test]
    fn repeated_attach_never_duplicates() {
        let table = Table::new();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let policy = ElectionPolicy::CreatorOnly;

        let first = attach_local_player(
            &table.creator,
            &table.snapshot(&table.creator),
            &mut rng,
            policy,
        )
        .unwrap();
        for _ in 0..5 {
            let again = attach_local_player(
                &table.creator,
                &table.snapshot(&table.creator),
                &mut rng,
                policy,
            )
            .unwrap();
            assert_eq!(again, Attachment::Bound(first.player().unwrap()));
        }

        let owned = table
            .snapshot(&table.creator)
            .loaded_players()
            .filter(|p| p.owner == table.creator.replica().account())
            .count();
        assert_eq!(owned, 1);
    }

    #[test]
    fn unresolved_entries_keep_attachment_pending() {
        let table = Table::new();
        table.seat(Vec3::ZERO);

        let replica = Replica::connect(&table.hub, AccountId::new());
        let game = GameHandle::attach(&replica, table.creator.id());
        table.hub.deliver_all();
        game.load(LoadDepth::Shallow).unwrap();
        table.hub.deliver_all();
        let shallow = game.load(LoadDepth::Shallow).unwrap().unwrap();
        assert!(!shallow.players_loaded());

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let records = table.hub.record_count();
        let attached =
            attach_local_player(&game, &shallow, &mut rng, ElectionPolicy::CreatorOnly).unwrap();
        assert_eq!(attached, Attachment::Pending);
        assert_eq!(table.hub.record_count(), records);
    }

    #[test]
    fn joiners_do_not_elect_under_creator_only() {
        let table = Table::new();
        let joiner = table.join();
        table
            .creator
            .replica()
            .grant(
                table.group(),
                Member::Account(joiner.replica().account()),
                Role::Admin,
            )
            .unwrap();
        table.hub.deliver_all();

        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let snapshot = table.snapshot(&joiner);
        let attached =
            attach_local_player(&joiner, &snapshot, &mut rng, ElectionPolicy::CreatorOnly).unwrap();
        assert!(matches!(attached, Attachment::Created { elected: false, .. }));

        let after = table.snapshot(&table.creator);
        assert_eq!(after.status, GameStatus::Waiting);
        assert_eq!(after.current_it, None);
    }

    #[test]
    fn creator_only_race_elects_once() {
        let table = Table::new();
        let joiner = table.join();
        let policy = ElectionPolicy::CreatorOnly;
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let joiner_view = table.snapshot(&joiner);
        let creator_view = table.snapshot(&table.creator);
        let theirs = attach_local_player(&joiner, &joiner_view, &mut rng, policy).unwrap();
        let mine = attach_local_player(&table.creator, &creator_view, &mut rng, policy).unwrap();
        table.hub.deliver_all();

        let a = table.snapshot(&table.creator);
        let b = table.snapshot(&joiner);
        assert_eq!(a, b);
        assert_eq!(a.slots().len(), 2);
        assert_eq!(a.current_it, mine.player());
        assert_ne!(a.current_it, theirs.player());
    }

    #[test]
    fn admin_race_converges_on_a_listed_player() {
        let table = Table::new();
        let joiner = table.join();
        table
            .creator
            .replica()
            .grant(
                table.group(),
                Member::Account(joiner.replica().account()),
                Role::Admin,
            )
            .unwrap();
        table.hub.deliver_all();

        let policy = ElectionPolicy::AdminAndNonEmpty;
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let joiner_view = table.snapshot(&joiner);
        let creator_view = table.snapshot(&table.creator);
        let theirs = attach_local_player(&joiner, &joiner_view, &mut rng, policy).unwrap();
        let mine = attach_local_player(&table.creator, &creator_view, &mut rng, policy).unwrap();
        assert!(matches!(theirs, Attachment::Created { elected: true, .. }));
        assert!(matches!(mine, Attachment::Created { elected: true, .. }));
        table.hub.deliver_all();

        let a = table.snapshot(&table.creator);
        let b = table.snapshot(&joiner);
        assert_eq!(a.current_it, b.current_it);
        let it = a.current_it.unwrap();
        assert!(a.contains_player(it));
        assert_eq!(a.status, GameStatus::Playing);
    }
}
