use super::*;
use clap::CommandFactory;
use humaniq::AuthPhase;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn contract_flag_parses_and_builds_config() {
    let cli = Cli::try_parse_from([
        "humaniq",
        "--contract",
        "v2",
        "--api-url",
        "http://backend.test/api/",
        "--retry-max",
        "2",
        "whoami",
    ])
    .unwrap();
    let config = client_config(&cli).unwrap();
    assert_eq!(config.contract, ApiContract::V2);
    assert_eq!(config.base_url, "http://backend.test/api");
    assert_eq!(config.retry.max_retries, 2);
}

#[test]
fn unknown_contract_is_rejected_by_parser() {
    assert!(Cli::try_parse_from(["humaniq", "--contract", "v3", "logout"]).is_err());
}

#[test]
fn assessment_scores_map_onto_skill_scores() {
    let cli = Cli::try_parse_from([
        "humaniq",
        "assessment",
        "submit",
        "--communication",
        "4",
        "--active-listening",
        "3",
        "--conflict-resolution",
        "2",
        "--teamwork",
        "5",
        "--critical-thinking",
        "4",
        "--time-management",
        "1",
    ])
    .unwrap();
    let Command::Assessment(AssessmentCommand { command: AssessmentSubcommand::Submit(args) }) = cli.command else {
        panic!("expected assessment submit");
    };
    let scores = SkillScores::from(args);
    assert_eq!(scores.teamwork, 5);
    assert_eq!(scores.time_management, 1);
}

#[test]
fn protected_commands_require_a_session() {
    let signed_out = AuthState::default();
    assert!(matches!(protected_page(&signed_out), Err(CliError::NotSignedIn)));
    assert!(public_page(&signed_out).is_ok());
}

#[test]
fn login_is_refused_while_signed_in() {
    let state = AuthState {
        phase: AuthPhase::Authenticated,
        user: Some(humaniq::api::types::CurrentUser {
            id: 1,
            name: "Ana".to_owned(),
            email: "user@example.com".to_owned(),
            points: 0,
            level: 1,
            created_at: None,
            last_login: None,
            badges: Vec::new(),
        }),
        error: None,
    };
    assert!(protected_page(&state).is_ok());
    match public_page(&state) {
        Err(CliError::AlreadySignedIn(email)) => assert_eq!(email, "user@example.com"),
        other => panic!("expected AlreadySignedIn, got {other:?}"),
    }
}
