//! Replay a short pricing-page visit and print the resulting events

fn main() {
    let ndjson = r#"{"timestamp":"2024-01-15T14:00:00Z","signal":"tick"}
{"timestamp":"2024-01-15T14:00:04Z","signal":"scroll","percent":35.0,"offset":1400.0}
{"timestamp":"2024-01-15T14:00:09Z","signal":"scroll","percent":80.0,"offset":3200.0}
{"timestamp":"2024-01-15T14:00:15Z","signal":"click","target":{"href":"/files/price-sheet.pdf","role":"button","text":"Price sheet"}}
{"timestamp":"2024-01-15T14:00:21Z","signal":"click","target":{"href":"https://partner.io/compare"}}
{"timestamp":"2024-01-15T14:00:33Z","signal":"focus_in","form_id":"contact"}
{"timestamp":"2024-01-15T14:00:38Z","signal":"scroll","percent":80.0,"offset":60.0}
{"timestamp":"2024-01-15T14:00:41Z","signal":"offer_dismissed"}
{"timestamp":"2024-01-15T14:01:05Z","signal":"before_unload"}"#;

    let config = synheart_engage::EngageConfig {
        page_host: Some("example.com".to_string()),
        ..Default::default()
    };

    match synheart_engage::replay_ndjson(ndjson, "/pricing", config) {
        Ok(events) => {
            for event in events {
                println!("{event}");
            }
        }
        Err(e) => eprintln!("Error: {e:?}"),
    }
}
