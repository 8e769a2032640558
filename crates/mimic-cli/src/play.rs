//! Interactive game loop on stdin.

use anyhow::{Context, Result};
use mimic_core::{GamePhase, GameSession, Player, SessionError, SessionSnapshot, TurnReport};
use mimic_hw::ImportCamera;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Shoot(Option<PathBuf>),
    Retry,
    Next,
    Reset,
    Name(String),
    Status,
    Standings,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word {
            "" => Command::Empty,
            "shoot" | "s" => Command::Shoot((!rest.is_empty()).then(|| PathBuf::from(rest))),
            "retry" => Command::Retry,
            "next" | "n" => Command::Next,
            "reset" => Command::Reset,
            "name" if !rest.is_empty() => Command::Name(rest.to_string()),
            "status" => Command::Status,
            "standings" | "top" => Command::Standings,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

const HELP: &str = "\
commands:
  shoot [photo]   capture the current player (photo path when importing)
  retry           re-run scoring for the current photo
  next            commit the current player and start the next challenger
  reset           start a new game with a fresh leader
  name <name>     rename the current player
  status          show the current player and last error
  standings       challengers ranked by similarity to the leader
  quit";

pub async fn run(session: Arc<GameSession>, importer: Option<Arc<ImportCamera>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");
    print_turn(&session.snapshot());

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match Command::parse(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Unknown(input) => println!("unknown command: {input} (try `help`)"),
            Command::Shoot(photo) => {
                if session.is_capture_in_flight() {
                    println!("a capture is already in progress");
                    continue;
                }
                let photo = match (&importer, photo) {
                    (Some(importer), Some(photo)) => Some((Arc::clone(importer), photo)),
                    (Some(_), None) => {
                        println!("no photo given; capture will be cancelled");
                        None
                    }
                    (None, Some(_)) => {
                        println!("using the webcam; photo path ignored");
                        None
                    }
                    (None, None) => None,
                };
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    match shoot(&session, photo).await {
                        Ok(report) => println!("{}", describe_report(&report)),
                        Err(e) => println!("error: {e}"),
                    }
                });
            }
            Command::Retry => {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    match session.retry_scoring().await {
                        Ok(report) => println!("{}", describe_report(&report)),
                        Err(e) => println!("error: {e}"),
                    }
                });
            }
            Command::Next => match session.advance_turn() {
                Ok(()) => print_turn(&session.snapshot()),
                Err(e) => println!("error: {e}"),
            },
            Command::Reset => {
                session.reset_game();
                println!("new game");
                print_turn(&session.snapshot());
            }
            Command::Name(name) => {
                session.rename_current(name);
                print_turn(&session.snapshot());
            }
            Command::Status => print_status(&session.snapshot()),
            Command::Standings => print_standings(&session.standings()),
        }
    }
    Ok(())
}

/// Stage the imported photo and capture it. The photo is staged only for the
/// capture that will consume it, so a rejected shot never replaces the photo
/// of the one in flight.
async fn shoot(
    session: &GameSession,
    photo: Option<(Arc<ImportCamera>, PathBuf)>,
) -> Result<TurnReport, SessionError> {
    let Some((importer, photo)) = photo else {
        return session.start_capture().await;
    };
    if !importer.try_stage(photo) {
        return Err(SessionError::CaptureInFlight);
    }
    let result = session.start_capture().await;
    if matches!(result, Err(SessionError::CaptureInFlight)) {
        importer.unstage();
    }
    result
}

pub fn describe_report(report: &TurnReport) -> String {
    match report {
        TurnReport::Cancelled => "capture cancelled".to_string(),
        TurnReport::CaptureFailed(message) => format!("capture failed: {message}"),
        TurnReport::NoFaceDetected => "no face detected, try again".to_string(),
        TurnReport::Scored { emotion, score } => {
            format!("scored {score:.3} (mostly {})", emotion.dominant())
        }
        TurnReport::Unscored(message) => format!("photo kept but not scored: {message}"),
        TurnReport::Discarded => "result discarded after reset".to_string(),
    }
}

pub fn describe_player(player: &Player) -> String {
    let role = if player.is_leader { "leader" } else { "challenger" };
    let score = match (player.score, player.emotion) {
        (Some(score), Some(emotion)) => format!("{score:.3} ({})", emotion.dominant()),
        (None, Some(emotion)) => format!("unscored ({})", emotion.dominant()),
        _ if player.photo_path.is_some() => "photo taken".to_string(),
        _ => "no photo".to_string(),
    };
    format!("{} [{role}] {score}", player.name)
}

fn print_turn(snapshot: &SessionSnapshot) {
    let prompt = match snapshot.phase {
        GamePhase::AwaitingLeaderCapture => "pull a face and `shoot`",
        GamePhase::AwaitingChallengerCapture => "copy the leader's face and `shoot`",
    };
    println!("{}: {prompt}", snapshot.current.name);
}

fn print_status(snapshot: &SessionSnapshot) {
    println!("current: {}", describe_player(&snapshot.current));
    if snapshot.capture_in_flight {
        println!("capture in progress");
    }
    if let Some(err) = &snapshot.last_error {
        println!("last error: {err}");
    }
    println!("roster: {} player(s)", snapshot.roster.len());
    for player in &snapshot.roster {
        println!("  {}", describe_player(player));
    }
}

fn print_standings(ranked: &[Player]) {
    if ranked.is_empty() {
        println!("no scored challengers yet");
        return;
    }
    for (i, player) in ranked.iter().enumerate() {
        println!("{:>2}. {}", i + 1, describe_player(player));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::{EmotionLabel, EmotionVector};
    use mimic_emotion::{EmotionApiClient, EmotionApiConfig};
    use mimic_hw::LocalFilesystem;

    fn import_session(importer: &Arc<ImportCamera>) -> GameSession {
        let scoring = EmotionApiClient::new(&EmotionApiConfig {
            endpoint: "http://127.0.0.1:1/recognize".into(),
            api_key: "unused".into(),
            timeout_secs: 1,
        })
        .unwrap();
        GameSession::new(
            importer.clone(),
            Arc::new(LocalFilesystem::new()),
            Arc::new(scoring),
        )
    }

    #[tokio::test]
    async fn test_shoot_leaves_pending_photo_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let importer = Arc::new(ImportCamera::new(dir.path().join("captures")));
        let session = import_session(&importer);
        let first = dir.path().join("first.jpg");
        assert!(importer.try_stage(&first));

        let err = shoot(&session, Some((importer.clone(), dir.path().join("second.jpg"))))
            .await
            .unwrap_err();

        assert_eq!(err, SessionError::CaptureInFlight);
        assert_eq!(importer.unstage(), Some(first));
        assert!(!session.is_capture_in_flight());
    }

    #[tokio::test]
    async fn test_shoot_consumes_its_own_photo() {
        let dir = tempfile::tempdir().unwrap();
        let importer = Arc::new(ImportCamera::new(dir.path().join("captures")));
        let session = import_session(&importer);

        let report = shoot(&session, Some((importer.clone(), dir.path().join("ghost.jpg"))))
            .await
            .unwrap();

        match report {
            TurnReport::CaptureFailed(message) => assert!(message.contains("photo not found")),
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(importer.unstage(), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  "), Command::Empty);
        assert_eq!(Command::parse("shoot"), Command::Shoot(None));
        assert_eq!(
            Command::parse("shoot  /tmp/my face.jpg "),
            Command::Shoot(Some(PathBuf::from("/tmp/my face.jpg")))
        );
        assert_eq!(Command::parse("n"), Command::Next);
        assert_eq!(Command::parse("name Ada L"), Command::Name("Ada L".into()));
        assert_eq!(Command::parse("q"), Command::Quit);
    }

    #[test]
    fn test_parse_name_without_argument_is_unknown() {
        assert_eq!(Command::parse("name"), Command::Unknown("name".into()));
        assert_eq!(Command::parse("dance"), Command::Unknown("dance".into()));
    }

    #[test]
    fn test_describe_player() {
        let mut player = Player::challenger("Player 2");
        assert_eq!(describe_player(&player), "Player 2 [challenger] no photo");

        player.photo_path = Some(PathBuf::from("/tmp/p.jpg"));
        assert_eq!(describe_player(&player), "Player 2 [challenger] photo taken");

        player.emotion = Some(EmotionVector::single(EmotionLabel::Surprise, 0.9));
        player.score = Some(0.8126);
        assert_eq!(
            describe_player(&player),
            "Player 2 [challenger] 0.813 (surprise)"
        );
    }

    #[test]
    fn test_describe_report() {
        let report = TurnReport::Scored {
            emotion: EmotionVector::single(EmotionLabel::Happiness, 1.0),
            score: 1.0,
        };
        assert_eq!(describe_report(&report), "scored 1.000 (mostly happiness)");
        assert_eq!(
            describe_report(&TurnReport::CaptureFailed("boom".into())),
            "capture failed: boom"
        );
    }
}
