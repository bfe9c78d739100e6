//! Timer normalisation in a real page. Needs a local Chrome.

#![cfg(feature = "cdp")]

use std::time::Duration;

use postshot::cdp::CdpFactory;
use postshot::shim::TimerShim;
use postshot::{EngineConfig, EngineFactory};
use tiny_http::{Header, Response, Server};

const PAGE: &str = r#"<html><body><script>
    var t0 = Date.now();
    var r = { cleared: false };
    setTimeout(function(){ r.short = Date.now() - t0; }, 800);
    var h = setTimeout(function(){ r.cleared = true; }, 200);
    clearTimeout(h);
    setTimeout(function(tag){
        r.long = Date.now() - t0;
        r.tag = tag;
        var a = document.createElement('article');
        a.textContent = JSON.stringify(r);
        document.body.appendChild(a);
    }, 1500, 'passed');
</script></body></html>"#;

fn start_test_server() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let header = "Content-Type: text/html".parse::<Header>().unwrap();
            let _ = request.respond(Response::from_string(PAGE).with_header(header));
        }
    });
    format!("http://{}/", addr)
}

#[test]
#[ignore]
fn test_short_timers_fire_early_and_long_ones_wait() {
    let url = start_test_server();
    let mut engine = match CdpFactory.launch(EngineConfig::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Skipping: Chrome failed to launch: {}", e);
            return;
        }
    };

    engine.open_page().unwrap();
    engine.add_init_script(&TimerShim::default().script()).unwrap();
    engine.navigate(&url).unwrap();
    assert!(engine
        .wait_for_selector("article", Duration::from_secs(5))
        .unwrap());

    let text = engine
        .evaluate("document.querySelector('article').textContent")
        .unwrap();
    let result: serde_json::Value = serde_json::from_str(text.as_str().unwrap()).unwrap();
    assert!(result["short"].as_f64().unwrap() < 400.0, "{}", result);
    assert!(result["long"].as_f64().unwrap() >= 1400.0, "{}", result);
    assert_eq!(result["cleared"], false);
    assert_eq!(result["tag"], "passed");
    engine.close().unwrap();
}
