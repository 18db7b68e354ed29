//! Text-to-image commands
//!
//! The payload is a `key=value` list separated by `;&amp;` (the transport
//! escapes `&` in raw messages). Prompts are expanded through the
//! configured quality and style templates before being posted to the
//! image API.

use super::files::save_image;
use crate::bot::BotHandle;
use crate::command::factory::{Command, CommandOutput};
use crate::command::resolver::ParamBag;
use crate::transport::RetryPolicy;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use onebot_shared::Reply;
use rand::Rng;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

const ITEM_SEPARATOR: &str = ";&amp;";
const FALLBACK_QUALITY: &str = "Standard v3.1";
const FALLBACK_STYLE: &str = "(None)";

const ON_DEMAND_PARAMS: &[&str] = &[
    "message",
    "message_type",
    "target_id",
    "api_url",
    "save_dir",
    "prefix",
    "negative_prompt",
    "quality",
    "style",
    "quality_dict",
    "style_dict",
    "custom_width",
    "custom_height",
    "notice",
    "notice_postdata",
    "return_url",
];

const SCHEDULED_PARAMS: &[&str] = &[
    "prompt",
    "message_type",
    "target_id",
    "api_url",
    "save_dir",
    "prefix",
    "negative_prompt",
    "quality",
    "style",
    "quality_dict",
    "style_dict",
    "custom_width",
    "custom_height",
    "notice",
    "return_url",
];

/// Split a `key=value;&amp;key=value` payload
pub fn parse_payload(raw: &str) -> Result<IndexMap<String, String>> {
    raw.split(ITEM_SEPARATOR)
        .map(|item| {
            item.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.to_string()))
                .ok_or_else(|| anyhow!("Malformed item '{}', expected key=value", item))
        })
        .collect()
}

fn template<'a>(dict: &'a Value, name: &str, fallback: &str, field: &str) -> Option<&'a str> {
    dict.get(name)
        .or_else(|| dict.get(fallback))
        .and_then(|entry| entry.get(field))
        .and_then(Value::as_str)
}

fn tidy(text: &str) -> String {
    text.trim().trim_matches(',').trim().to_string()
}

/// Wrap prompts in the quality template, then the style template
///
/// Negative prompts nest the other way round. Unknown names fall back to
/// the default entries; missing dictionaries leave the prompt unchanged.
pub fn expand_prompt(
    prompt: &str,
    negative_prompt: &str,
    quality: &str,
    style: &str,
    quality_dict: &Value,
    style_dict: &Value,
) -> (String, String) {
    let quality_prompt = template(quality_dict, quality, FALLBACK_QUALITY, "prompt").unwrap_or("{prompt}");
    let quality_negative =
        template(quality_dict, quality, FALLBACK_QUALITY, "negative_prompt").unwrap_or("{negative_prompt}");
    let style_prompt = template(style_dict, style, FALLBACK_STYLE, "prompt").unwrap_or("{prompt}");
    let style_negative =
        template(style_dict, style, FALLBACK_STYLE, "negative_prompt").unwrap_or("{negative_prompt}");

    let prompt = style_prompt.replace("{prompt}", &quality_prompt.replace("{prompt}", prompt));
    let negative = quality_negative.replace(
        "{negative_prompt}",
        &style_negative.replace("{negative_prompt}", negative_prompt),
    );
    (tidy(&prompt), tidy(&negative))
}

/// Image request settings taken from the resolved parameters
struct ImageJob {
    message_type: String,
    target_id: i64,
    api_url: String,
    save_dir: String,
    prefix: String,
    negative_prompt: String,
    quality: String,
    style: String,
    quality_dict: Value,
    style_dict: Value,
    custom_width: i64,
    custom_height: i64,
    notice: bool,
    notice_postdata: bool,
    return_url: bool,
}

impl ImageJob {
    fn from_args(args: &ParamBag, notice_default: bool) -> Result<Self> {
        Ok(Self {
            message_type: args.str_or("message_type", "private").to_string(),
            target_id: args.i64_or("target_id", 0),
            api_url: args.str("api_url")?.to_string(),
            save_dir: args.str_or("save_dir", "./cache").to_string(),
            prefix: args.str_or("prefix", "image").to_string(),
            negative_prompt: args.str_or("negative_prompt", "").to_string(),
            quality: args.str_or("quality", "").to_string(),
            style: args.str_or("style", "").to_string(),
            quality_dict: args.get("quality_dict").cloned().unwrap_or(Value::Null),
            style_dict: args.get("style_dict").cloned().unwrap_or(Value::Null),
            custom_width: args.i64_or("custom_width", 1024),
            custom_height: args.i64_or("custom_height", 1024),
            notice: args.bool_or("notice", notice_default),
            notice_postdata: args.bool_or("notice_postdata", false),
            return_url: args.bool_or("return_url", true),
        })
    }

    /// Request body for the image API; payload items override configured values
    fn postdata(&self, raw: &str) -> Result<Value> {
        let items = parse_payload(raw)?;
        let field = |key: &str, default: &str| items.get(key).cloned().unwrap_or_else(|| default.to_string());
        let size = |key: &str, default: i64| -> Result<i64> {
            match items.get(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be an integer", key)),
                None => Ok(default),
            }
        };

        let (prompt, negative_prompt) = expand_prompt(
            &field("prompt", ""),
            &field("negative_prompt", &self.negative_prompt),
            &field("quality", &self.quality),
            &field("style", &self.style),
            &self.quality_dict,
            &self.style_dict,
        );

        Ok(json!({
            "prompt": prompt,
            "negative_prompt": negative_prompt,
            "seed": rand::thread_rng().gen_range(0..=i32::MAX),
            "add_quality_tags": false,
            "style_selector": "(None)",
            "quality_selector": "(None)",
            "custom_width": size("custom_width", self.custom_width)?,
            "custom_height": size("custom_height", self.custom_height)?,
            "aspect_ratio_selector": "Custom",
            "return_url": self.return_url,
        }))
    }
}

/// Post the request; returns an image URL or the path of the saved file
async fn render(bot: &BotHandle, job: &ImageJob, postdata: &Value) -> Result<String> {
    let policy = RetryPolicy::fixed(bot.settings().retry_count);
    let api_url = job.api_url.as_str();

    let response = policy
        .run("request image", move || async move {
            let response = bot
                .http_client()
                .post(api_url)
                .json(postdata)
                .send()
                .await
                .context("Image request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Image API answered {}: {}", status, body);
            }
            Ok(response)
        })
        .await?;

    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        let body: Value = response.json().await.context("Malformed image API response")?;
        return body
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Image API response has no url"));
    }

    let bytes = response.bytes().await.context("Failed to read image body")?;
    let path = save_image(&bytes, Path::new(&job.save_dir), &job.prefix).await?;
    Ok(path.to_string_lossy().into_owned())
}

/// Generates an image from a prompt
pub struct TextToImage {
    /// Scheduled runs take `prompt` and stay silent on failure unless `notice`
    scheduled: bool,
}

impl TextToImage {
    pub fn on_demand() -> Self {
        Self { scheduled: false }
    }

    pub fn scheduled() -> Self {
        Self { scheduled: true }
    }

    async fn fail(&self, bot: &BotHandle, job: &ImageJob, text: String) -> Option<CommandOutput> {
        if !self.scheduled {
            return Some(CommandOutput::typed(text, "text"));
        }
        if job.notice {
            bot.send_message(&Reply::text(text), &job.message_type, job.target_id)
                .await;
        }
        None
    }
}

#[async_trait]
impl Command for TextToImage {
    fn declared_params(&self) -> &'static [&'static str] {
        if self.scheduled {
            SCHEDULED_PARAMS
        } else {
            ON_DEMAND_PARAMS
        }
    }

    async fn invoke(&self, bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let raw = if self.scheduled {
            format!("prompt={}", args.str("prompt")?)
        } else {
            args.str("message")?.to_string()
        };
        let job = ImageJob::from_args(&args, !self.scheduled)?;

        let postdata = match job.postdata(&raw) {
            Ok(postdata) => postdata,
            Err(e) => return Ok(self.fail(bot, &job, format!("Invalid drawing request: {:#}", e)).await),
        };
        debug!("Image postdata: {}", postdata);

        if !self.scheduled && job.notice {
            let notice = if job.notice_postdata {
                format!("Drawing, postdata:\n{}", postdata)
            } else {
                "Drawing...".to_string()
            };
            bot.send_message(&Reply::text(notice), &job.message_type, job.target_id)
                .await;
        }

        match render(bot, &job, &postdata).await {
            Ok(image) => Ok(Some(CommandOutput::typed(image, "image"))),
            Err(e) => {
                warn!("Image generation failed: {:#}", e);
                Ok(self.fail(bot, &job, format!("Image generation failed: {:#}", e)).await)
            }
        }
    }
}
