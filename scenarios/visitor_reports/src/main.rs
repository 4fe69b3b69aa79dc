use stampede_runner::prelude::*;

const GET_VISITORS: &str = "/api/method/visitor_management.custom_api.visitor.get_visitors";

fn visitors(name: &str, location: &str, from_date: &str, to_date: &str) -> TaskDefinition {
    TaskDefinition::new(
        name,
        RequestTemplate::get(GET_VISITORS)
            .with_query("location", location)
            .with_query("from_date", from_date)
            .with_query("to_date", to_date),
    )
    .with_success(SuccessPredicate::StatusIn(vec![200]))
}

fn reports() -> TaskList {
    TaskList::weighted([
        visitors("Overall_Visitors", "", "", "").with_weight(3),
        visitors("Single_Date_2025-11-24", "", "2025-11-24", "2025-11-24"),
        visitors("Date_Range_2025-11-23_to_29", "", "2025-11-23", "2025-11-29"),
        visitors("Date_Range_Oct_Nov_2025", "", "2025-10-31", "2025-11-29"),
        visitors("Date_Range_Sep_Oct_2025", "", "2025-09-30", "2025-10-30"),
        visitors("Date_Range_2023_2024", "", "2023-12-31", "2024-12-30"),
        visitors("Location_SDSC_SHAR", "SDSC - SHAR", "2025-10-31", "2025-11-29"),
        visitors(
            "Location_Open_Workspace",
            "Open Work Space 2 - IITMRP E Block",
            "2025-10-31",
            "2025-11-29",
        ),
        visitors(
            "Location_Rocket_Factory",
            "Rocket Factory - IITMRP A Block",
            "2025-10-31",
            "2025-11-29",
        ),
        visitors("Location_Thaiyur", "Thaiyur", "2025-10-31", "2025-11-29"),
        visitors("Location_TAMCOE", "TAMCOE", "2025-10-31", "2025-11-29"),
        TaskDefinition::new(
            "Get_Organisation_List",
            RequestTemplate::get("/api/method/visitor_management.custom_api.visitor.get_org"),
        )
        .with_success(SuccessPredicate::StatusIn(vec![200])),
        TaskDefinition::new(
            "Get_Employee_List",
            RequestTemplate::get("/api/method/visitor_management.custom_api.visitor.get_referral"),
        )
        .with_success(SuccessPredicate::StatusIn(vec![200])),
    ])
}

fn main() -> StampedeResult<()> {
    let api_key = std::env::var("VISITOR_API_KEY").unwrap_or_else(|_| "627d011a1324aa6".to_string());
    let api_secret =
        std::env::var("VISITOR_API_SECRET").unwrap_or_else(|_| "115f2b70018adf7".to_string());

    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_duration_s(60)
        .with_default_users_per_type(10)
        .with_default_results_file("api_responses.csv")
        .use_user_type(
            UserType::new("report_viewer")
                .with_host("http://14.99.126.171")
                .with_credential(&api_key, &api_secret)
                .with_default_header("Authorization", "token {{identifier}}:{{secret}}")
                .use_tasks(reports())
                .with_think_time(ThinkTime::between_secs(1, 3)),
        );

    run(builder)?;

    Ok(())
}
