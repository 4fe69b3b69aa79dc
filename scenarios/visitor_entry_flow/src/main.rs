use stampede_runner::prelude::*;

const LOCATION: &str = "IITMRP E Block";
const MOBILE: &str = "9876543210";

/// One pass through the security desk: look up reference data, verify the visitor, check them in
/// and out again. The exit waits for a check-in to produce a visitor record.
fn visitor_desk() -> TaskList {
    TaskList::sequence([
        TaskDefinition::new(
            "get_org",
            RequestTemplate::get("/api/method/visitor_management.custom_api.visitor.get_org"),
        ),
        TaskDefinition::new(
            "get_referral",
            RequestTemplate::get("/api/method/visitor_management.custom_api.visitor.get_referral"),
        ),
        TaskDefinition::new(
            "generate_otp",
            RequestTemplate::post(
                "/api/method/visitor_management.custom_api.visitor.generate_and_send_otp",
            )
            .with_json_body(json!({ "mobile": MOBILE })),
        ),
        TaskDefinition::new(
            "verify_otp",
            RequestTemplate::post("/api/method/visitor_management.custom_api.visitor.verify_otp")
                .with_json_body(json!({ "mobile": MOBILE, "otp": "0000" })),
        ),
        TaskDefinition::new(
            "visitor_entry",
            RequestTemplate::post(
                "/api/method/visitor_management.custom_api.visitor.create_visitor_record",
            )
            .with_json_body(json!({
                "data": {
                    "visitor_name": "Visitor {{nonce}}",
                    "mobile": MOBILE,
                    "email": "visitor-{{nonce}}@example.com",
                    "referral": "EMP001",
                    "organisation": "ABC Corp",
                    "location": LOCATION,
                }
            })),
        )
        .extract("visitor_name", "/message/name"),
        TaskDefinition::new(
            "get_visitors",
            RequestTemplate::get("/api/method/visitor_management.custom_api.visitor.get_visitors")
                .with_query("location", LOCATION)
                .with_query("from_date", "2025-01-01")
                .with_query("to_date", "2025-12-31"),
        ),
        TaskDefinition::new(
            "visitor_exit",
            RequestTemplate::post("/api/method/visitor_management.custom_api.visitor.visitor_exit")
                .with_json_body(json!({ "docname": "{{visitor_name}}" })),
        )
        .consumes("visitor_name"),
    ])
}

fn main() -> StampedeResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_duration_s(120)
        .with_default_users_per_type(5)
        .with_default_spawn_rate(1.0)
        .use_user_type(
            UserType::new("security_desk")
                .with_host("http://14.99.126.171")
                .use_tasks(visitor_desk())
                .with_think_time(ThinkTime::between_secs(1, 3)),
        );

    run(builder)?;

    Ok(())
}
