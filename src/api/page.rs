//! HTML rendering of the countdown page.

use crate::{
    models::{BlockRateSource, CountdownResult},
    services::BlockRateEstimator,
};

pub fn render_countdown_page(countdown: &CountdownResult) -> String {
    let time_left = if countdown.upgrade_reached() {
        "upgrade height reached".to_string()
    } else {
        format_time_left(countdown.estimated_seconds_remaining)
    };

    COUNTDOWN_HTML
        .replace("{{network_name}}", &escape_html(&countdown.network_name))
        .replace("{{time_left}}", &time_left)
        .replace("{{current_height}}", &countdown.current_height.to_string())
        .replace("{{upgrade_height}}", &countdown.upgrade_height.to_string())
        .replace(
            "{{blocks_remaining}}",
            &countdown.blocks_remaining.max(0).to_string(),
        )
        .replace(
            "{{block_rate}}",
            &format!("{:.2}", BlockRateEstimator::round(countdown.block_rate)),
        )
        .replace(
            "{{block_rate_source}}",
            match countdown.block_rate_source {
                BlockRateSource::Measured => "measured",
                BlockRateSource::Static => "configured",
                BlockRateSource::Default => "default",
            },
        )
        .replace(
            "{{upgrade_time}}",
            &countdown
                .estimated_upgrade_time
                .format("%Y-%m-%d %H:%M UTC")
                .to_string(),
        )
        .replace(
            "{{upgrade_timestamp}}",
            &countdown.estimated_upgrade_time.timestamp().to_string(),
        )
}

/// Whole seconds left as `1d 2h 3m 4s`, dropping leading zero units.
pub fn format_time_left(seconds: f64) -> String {
    let total = seconds.max(0.0) as i64;
    let (days, rest) = (total / 86_400, total % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, secs) = (rest / 60, rest % 60);

    let parts = [(days, "d"), (hours, "h"), (minutes, "m")];
    let mut out: Vec<String> = parts
        .iter()
        .skip_while(|(value, _)| *value == 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    out.push(format!("{secs}s"));
    out.join(" ")
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const COUNTDOWN_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{{network_name}} upgrade countdown</title>
    <style>
      body {
        margin: 0;
        min-height: 100vh;
        display: flex;
        align-items: center;
        justify-content: center;
        font-family: "Avenir Next", "Trebuchet MS", sans-serif;
        background: linear-gradient(135deg, #1b1035, #3a1c71 60%, #7b4397);
        color: #f5f0ff;
      }
      main {
        text-align: center;
        padding: 2rem 3rem;
        border-radius: 1rem;
        background: rgba(255, 255, 255, 0.08);
        box-shadow: 0 10px 40px rgba(0, 0, 0, 0.3);
      }
      h1 {
        margin: 0 0 0.5rem;
        font-size: 1.6rem;
        letter-spacing: 0.04em;
      }
      .time-left {
        font-size: 3rem;
        font-weight: 700;
        margin: 1rem 0;
      }
      dl {
        display: grid;
        grid-template-columns: auto auto;
        gap: 0.4rem 1.5rem;
        margin: 0;
        text-align: left;
      }
      dt {
        color: #cbb8ff;
      }
      dd {
        margin: 0;
        font-variant-numeric: tabular-nums;
      }
    </style>
  </head>
  <body>
    <main>
      <h1>{{network_name}} upgrade</h1>
      <div class="time-left" id="time-left" data-target="{{upgrade_timestamp}}">{{time_left}}</div>
      <dl>
        <dt>Current height</dt><dd>{{current_height}}</dd>
        <dt>Upgrade height</dt><dd>{{upgrade_height}}</dd>
        <dt>Blocks remaining</dt><dd>{{blocks_remaining}}</dd>
        <dt>Block time</dt><dd>{{block_rate}}s ({{block_rate_source}})</dd>
        <dt>Estimated at</dt><dd>{{upgrade_time}}</dd>
      </dl>
    </main>
    <script>
      const el = document.getElementById("time-left");
      const target = Number(el.dataset.target);
      function tick() {
        const left = Math.floor(target - Date.now() / 1000);
        if (left <= 0) {
          return;
        }
        const d = Math.floor(left / 86400);
        const h = Math.floor((left % 86400) / 3600);
        const m = Math.floor((left % 3600) / 60);
        const s = left % 60;
        el.textContent = (d ? d + "d " : "") + (d || h ? h + "h " : "") + (d || h || m ? m + "m " : "") + s + "s";
      }
      setInterval(tick, 1000);
    </script>
  </body>
</html>
"#;
