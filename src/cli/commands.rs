use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::app::App;
use crate::config::AppConfig;
use crate::filter::{CategoryFilter, PinFilter, StatusFilter};
use crate::model::{Coordinate, PinCategory, PinId, PinRecord, PinStats, PinStatus, Scope, Section};
use crate::staging::FormDraft;
use crate::storage::{PinBackend, PinStore};

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Browse public pins instead of your own
    #[arg(long)]
    pub public: bool,
    /// Only pins with this status (all, wishlisted, visited, favorite)
    #[arg(long)]
    pub status: Option<StatusFilter>,
    /// Only pins in this category (all, trip, hotel, restaurant, attraction, other)
    #[arg(long)]
    pub category: Option<CategoryFilter>,
    /// Case-insensitive text to look for in titles and sections
    #[arg()]
    pub search: Vec<String>,
    /// Limit the number of pins printed
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Title for the pin
    pub title: String,
    /// Latitude in degrees (-90 to 90)
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,
    /// Longitude in degrees (-180 to 180)
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,
    #[arg(long, default_value_t = PinStatus::Wishlisted)]
    pub status: PinStatus,
    #[arg(long, default_value_t = PinCategory::Other)]
    pub category: PinCategory,
    /// Keep the pin out of the public collection
    #[arg(long)]
    pub private: bool,
    /// A section as "Heading: text". Repeatable. If omitted, stdin becomes a "Notes" section.
    #[arg(long = "section")]
    pub sections: Vec<String>,
    /// Image file to attach
    #[arg(long)]
    pub image: Option<std::path::PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Pin identifier
    pub id: u64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub status: Option<PinStatus>,
    #[arg(long)]
    pub category: Option<PinCategory>,
    #[arg(long, conflicts_with = "private")]
    pub public: bool,
    #[arg(long)]
    pub private: bool,
    /// Replaces every section. Repeatable, as "Heading: text".
    #[arg(long = "section")]
    pub sections: Vec<String>,
    /// Replace the image with this file
    #[arg(long)]
    pub image: Option<std::path::PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Pin identifier
    pub id: u64,
    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CopyArgs {
    /// Identifier of a public pin
    pub id: u64,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    Ok(runtime.block_on(future))
}

pub fn list_pins(config: &AppConfig, backend: &dyn PinBackend, args: ListArgs) -> Result<()> {
    let output = block_on(run_list(config, backend, &args))??;
    print!("{output}");
    Ok(())
}

async fn run_list(config: &AppConfig, backend: &dyn PinBackend, args: &ListArgs) -> Result<String> {
    let scope = if args.public {
        Scope::Public
    } else {
        config.browse.default_scope
    };
    let mut store = PinStore::new(scope, config.server.caller());
    store
        .load(backend, scope)
        .await
        .with_context(|| format!("loading {}", scope.label()))?;

    let filter = PinFilter {
        status: args.status.unwrap_or(config.browse.status_filter),
        category: args.category.unwrap_or(config.browse.category_filter),
        search: args.search.join(" "),
    };
    let visible = filter.apply(store.pins());
    let shown = &visible[..visible.len().min(args.limit)];
    Ok(format_pin_list(shown, &store))
}

fn format_pin_list(pins: &[&PinRecord], store: &PinStore) -> String {
    if pins.is_empty() {
        return "No pins found.\n".to_string();
    }
    let mut out = String::new();
    for pin in pins {
        let mut headline = format!(
            "{}  {} {}  [{}]",
            pin.id,
            pin.status.icon(),
            pin.title,
            pin.category.label()
        );
        if !pin.is_public {
            headline.push_str("  [PRIVATE]");
        }
        if store.is_owner(pin) == Some(false) {
            if let Some(name) = &pin.owner_name {
                let _ = write!(headline, "  by {name}");
            }
        }
        let _ = writeln!(&mut out, "{headline}");
        let _ = writeln!(
            &mut out,
            "    at {}  added {}",
            pin.coordinate,
            format_timestamp(pin.created_at)
        );
        for section in &pin.sections {
            let heading = if section.title.is_empty() {
                "-"
            } else {
                section.title.as_str()
            };
            let first_line = section.content.lines().next().unwrap_or_default();
            let _ = writeln!(&mut out, "    {heading}: {first_line}");
        }
        out.push('\n');
    }
    out
}

pub fn add_pin(config: &AppConfig, backend: &dyn PinBackend, mut args: AddArgs) -> Result<()> {
    if args.sections.is_empty() {
        if let Some(body) = read_stdin()?.filter(|body| !body.trim().is_empty()) {
            args.sections.push(format!("Notes: {}", body.trim_end()));
        }
    }
    let pin = block_on(run_add(config, backend, &args))??;
    println!(
        "Created pin {} at {}{}",
        pin.id,
        pin.coordinate,
        if pin.is_public { "" } else { " (private)" }
    );
    Ok(())
}

async fn run_add(config: &AppConfig, backend: &dyn PinBackend, args: &AddArgs) -> Result<PinRecord> {
    let coordinate = Coordinate::new(args.lat, args.lon)?;
    let mut draft = FormDraft::for_location(coordinate)
        .with_image_limit(config.staging.max_image_bytes)
        .with_title(args.title.as_str())
        .with_status(args.status)
        .with_category(args.category)
        .with_public(!args.private);
    draft = with_sections(draft, &parse_sections(&args.sections))?;
    if let Some(path) = &args.image {
        draft = stage_file(&draft, path)?;
    }
    let submission = draft.to_submission()?;

    let mut store = PinStore::new(Scope::Mine, config.server.caller());
    let id = store.create(backend, &submission).await.context("creating pin")?;
    store
        .get(id)
        .cloned()
        .context("server response did not include the new pin")
}

pub fn edit_pin(config: &AppConfig, backend: &dyn PinBackend, args: EditArgs) -> Result<()> {
    let pin = block_on(run_edit(config, backend, &args))??;
    println!("Updated pin {} ({})", pin.id, pin.title);
    Ok(())
}

async fn run_edit(config: &AppConfig, backend: &dyn PinBackend, args: &EditArgs) -> Result<PinRecord> {
    let id = PinId(args.id);
    let mut store = load_containing(config, backend, Scope::Mine, id).await?;
    let Some(current) = store.get(id) else {
        bail!("pin {id} is not in your collection");
    };

    let mut draft = FormDraft::from_pin(current).with_image_limit(config.staging.max_image_bytes);
    if let Some(title) = &args.title {
        draft = draft.with_title(title.as_str());
    }
    if let Some(status) = args.status {
        draft = draft.with_status(status);
    }
    if let Some(category) = args.category {
        draft = draft.with_category(category);
    }
    if args.public || args.private {
        draft = draft.with_public(args.public);
    }
    if !args.sections.is_empty() {
        let mut cleared = draft.clone();
        while !cleared.sections().is_empty() {
            cleared = cleared.remove_section(0)?;
        }
        draft = with_sections(cleared, &parse_sections(&args.sections))?;
    }
    if let Some(path) = &args.image {
        draft = stage_file(&draft, path)?;
    }
    let submission = draft.to_submission()?;

    store
        .update(backend, id, &submission)
        .await
        .with_context(|| format!("updating pin {id}"))?;
    store
        .get(id)
        .cloned()
        .with_context(|| format!("pin {id} vanished after update"))
}

pub fn delete_pin(config: &AppConfig, backend: &dyn PinBackend, args: DeleteArgs) -> Result<()> {
    let id = PinId(args.id);
    let mut store = block_on(load_containing(config, backend, Scope::Mine, id))??;
    let Some(pin) = store.get(id) else {
        bail!("pin {id} is not in your collection");
    };
    if !args.yes {
        let answer = prompt(&format!("Delete pin {id} ({})? [y/N]", pin.title))?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Kept pin {id}");
            return Ok(());
        }
    }
    block_on(store.remove(backend, id))?.with_context(|| format!("deleting pin {id}"))?;
    println!("Deleted pin {id}");
    Ok(())
}

pub fn copy_pin(config: &AppConfig, backend: &dyn PinBackend, args: CopyArgs) -> Result<()> {
    let id = PinId(args.id);
    block_on(run_copy(config, backend, id))??;
    println!("Added {id} to My Pins");
    Ok(())
}

async fn run_copy(config: &AppConfig, backend: &dyn PinBackend, id: PinId) -> Result<()> {
    let store = load_containing(config, backend, Scope::Public, id).await?;
    let Some(pin) = store.get(id) else {
        bail!("pin {id} is not among the public pins");
    };
    if store.is_owner(pin) == Some(true) {
        bail!("pin {id} is already yours");
    }
    store
        .copy(backend, id)
        .await
        .with_context(|| format!("copying pin {id}"))?;
    Ok(())
}

pub fn show_stats(backend: &dyn PinBackend) -> Result<()> {
    let stats = block_on(backend.stats())?.context("fetching stats")?;
    print!("{}", format_stats(&stats));
    Ok(())
}

fn format_stats(stats: &PinStats) -> String {
    use strum::IntoEnumIterator;

    let mut out = String::new();
    let _ = writeln!(&mut out, "Total pins: {}", stats.total_pins);
    for status in PinStatus::iter() {
        let _ = writeln!(&mut out, "  {:<12}{}", status.label(), stats.for_status(status));
    }
    for category in PinCategory::iter() {
        let _ = writeln!(
            &mut out,
            "  {:<12}{}",
            category.plural_label(),
            stats.for_category(category)
        );
    }
    out
}

async fn load_containing(
    config: &AppConfig,
    backend: &dyn PinBackend,
    scope: Scope,
    id: PinId,
) -> Result<PinStore> {
    let mut store = PinStore::new(scope, config.server.caller());
    let count = store
        .load(backend, scope)
        .await
        .with_context(|| format!("loading {}", scope.label()))?;
    tracing::debug!(count, %id, "collection loaded");
    Ok(store)
}

/// "Heading: text" becomes a titled section; anything else is content only.
fn parse_section(raw: &str) -> Section {
    match raw.split_once(':') {
        Some((title, content)) if !title.trim().is_empty() && !title.contains('\n') => {
            Section::new(title.trim(), content.trim())
        }
        _ => Section::new("", raw.trim()),
    }
}

fn parse_sections(raw: &[String]) -> Vec<Section> {
    raw.iter().map(|entry| parse_section(entry)).collect()
}

fn with_sections(draft: FormDraft, sections: &[Section]) -> Result<FormDraft> {
    use crate::staging::SectionField;

    let mut draft = draft;
    for section in sections {
        let index = draft.sections().len();
        draft = draft
            .add_section()
            .update_section(index, SectionField::Title, section.title.as_str())?
            .update_section(index, SectionField::Content, section.content.as_str())?;
    }
    Ok(draft)
}

fn stage_file(draft: &FormDraft, path: &Path) -> Result<FormDraft> {
    let bytes = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let staged = draft
        .stage_image(file_name, bytes)
        .with_context(|| format!("staging {}", path.display()))?;
    Ok(staged)
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{} ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn format_timestamp(dt: OffsetDateTime) -> String {
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::PinError;
    use crate::model::UserId;
    use crate::storage::tests::FakeBackend;

    fn config_for(user: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.user_id = Some(user);
        config
    }

    fn add_args(title: &str) -> AddArgs {
        AddArgs {
            title: title.into(),
            lat: 35.6586,
            lon: 139.7454,
            status: PinStatus::Visited,
            category: PinCategory::Attraction,
            private: false,
            sections: vec!["Tips: Go at night".into()],
            image: None,
        }
    }

    #[test]
    fn section_arguments_split_on_first_colon() {
        assert_eq!(
            parse_section("Getting there: Oedo line: Akabanebashi"),
            Section::new("Getting there", "Oedo line: Akabanebashi")
        );
        assert_eq!(parse_section("just text"), Section::new("", "just text"));
        assert_eq!(parse_section(": leading"), Section::new("", ": leading"));
    }

    #[tokio::test]
    async fn add_then_list_shows_the_pin() -> Result<()> {
        let backend = FakeBackend::new(UserId(1));
        let config = config_for(1);
        let created = run_add(&config, &backend, &add_args("Tokyo Tower")).await?;
        assert_eq!(created.sections, vec![Section::new("Tips", "Go at night")]);

        let listing = run_list(&config, &backend, &ListArgs { limit: 10, ..ListArgs::default() }).await?;
        insta::assert_snapshot!(listing.trim_end(), @r"
        #101  ✓ Tokyo Tower  [Attraction]
            at 35.6586, 139.7454  added 1970-01-01T00:00:00Z
            Tips: Go at night
        ");
        Ok(())
    }

    #[tokio::test]
    async fn add_rejects_out_of_range_coordinates_before_sending() {
        let backend = FakeBackend::new(UserId(1));
        let mut args = add_args("Nowhere");
        args.lat = 91.0;
        assert!(run_add(&config_for(1), &backend, &args).await.is_err());
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_search() -> Result<()> {
        let backend = FakeBackend::new(UserId(1));
        let config = config_for(1);
        run_add(&config, &backend, &add_args("Tokyo Tower")).await?;
        let mut other = add_args("Kyoto Inn");
        other.status = PinStatus::Wishlisted;
        run_add(&config, &backend, &other).await?;

        let args = ListArgs {
            status: Some(StatusFilter::Only(PinStatus::Wishlisted)),
            limit: 10,
            ..ListArgs::default()
        };
        let listing = run_list(&config, &backend, &args).await?;
        assert!(listing.contains("Kyoto Inn"));
        assert!(!listing.contains("Tokyo Tower"));

        let args = ListArgs {
            search: vec!["zzz".into()],
            limit: 10,
            ..ListArgs::default()
        };
        assert_eq!(run_list(&config, &backend, &args).await?, "No pins found.\n");
        Ok(())
    }

    #[tokio::test]
    async fn edit_replaces_sections_and_visibility() -> Result<()> {
        let backend = FakeBackend::new(UserId(1));
        let config = config_for(1);
        let created = run_add(&config, &backend, &add_args("Tokyo Tower")).await?;

        let args = EditArgs {
            id: created.id.0,
            private: true,
            sections: vec!["Food: Ramen nearby".into(), "Views".into()],
            ..EditArgs::default()
        };
        let updated = run_edit(&config, &backend, &args).await?;
        assert!(!updated.is_public);
        assert_eq!(updated.title, "Tokyo Tower");
        assert_eq!(
            updated.sections,
            vec![Section::new("Food", "Ramen nearby"), Section::new("", "Views")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn edit_of_someone_elses_pin_is_refused() {
        let backend = FakeBackend::new(UserId(1));
        let foreign = backend.seed(UserId(2), "Their pin", true);
        let args = EditArgs {
            id: foreign.0,
            title: Some("Mine now".into()),
            ..EditArgs::default()
        };
        let err = run_edit(&config_for(1), &backend, &args)
            .await
            .expect_err("not in own collection");
        assert_eq!(err.to_string(), "pin #101 is not in your collection");
    }

    #[tokio::test]
    async fn copy_refuses_own_pins_and_copies_others() -> Result<()> {
        let backend = FakeBackend::new(UserId(1));
        let config = config_for(1);
        let own = backend.seed(UserId(1), "Mine", true);
        let foreign = backend.seed(UserId(2), "Theirs", true);

        assert!(run_copy(&config, &backend, own).await.is_err());
        run_copy(&config, &backend, foreign).await?;
        let mine = backend
            .pins
            .lock()
            .unwrap()
            .values()
            .filter(|pin| pin.owner == UserId(1))
            .count();
        assert_eq!(mine, 2);
        Ok(())
    }

    #[tokio::test]
    async fn server_failure_surfaces_as_error() {
        let backend = FakeBackend::new(UserId(1));
        backend.fail_next(PinError::Rejected { status: 500 });
        let err = run_list(&config_for(1), &backend, &ListArgs::default())
            .await
            .expect_err("load fails");
        assert_matches!(err.downcast_ref::<PinError>(), Some(PinError::Rejected { status: 500 }));
    }

    #[test]
    fn stats_are_listed_per_bucket() {
        let stats = PinStats {
            total_pins: 4,
            visited_pins: 4,
            restaurant_pins: 1,
            ..PinStats::default()
        };
        insta::assert_snapshot!(format_stats(&stats).trim_end(), @r"
        Total pins: 4
          Wishlisted  0
          Visited     4
          Favorite    0
          Trips       0
          Hotels      0
          Restaurants 1
          Attractions 0
          Other       0
        ");
    }
}
