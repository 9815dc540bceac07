use atom_syndication::{
    ContentBuilder, Entry, EntryBuilder, Feed, FeedBuilder, FixedDateTime, Link, LinkBuilder,
    PersonBuilder, Text,
};
use chrono::{DateTime, Utc};

use super::{FeedView, RenderError, RenderedItem};

pub(super) fn write(view: &FeedView<'_>) -> Result<Vec<u8>, RenderError> {
    let feed = feed(view);
    Ok(feed.write_to(Vec::new())?)
}

fn fixed(time: DateTime<Utc>) -> FixedDateTime {
    time.into()
}

fn link(href: &str, rel: &str) -> Link {
    LinkBuilder::default()
        .href(href.to_string())
        .rel(rel.to_string())
        .build()
}

fn feed(view: &FeedView<'_>) -> Feed {
    let meta = view.metadata;
    let mut builder = FeedBuilder::default();
    builder
        .title(meta.title.clone())
        .id(view.base_url.clone())
        .updated(fixed(view.updated().unwrap_or_default()))
        .links(vec![
            link(view.homepage(), "alternate"),
            link(&view.atom_url, "self"),
        ])
        .lang(meta.language.clone())
        .entries(
            view.items
                .iter()
                .map(|item| entry(view, item))
                .collect::<Vec<_>>(),
        );
    if !meta.description.is_empty() {
        builder.subtitle(Some(Text::plain(meta.description.clone())));
    }
    if !meta.icon.is_empty() {
        builder.icon(Some(meta.icon.clone()));
    }
    builder.build()
}

fn entry(view: &FeedView<'_>, item: &RenderedItem<'_>) -> Entry {
    let entry = item.entry;
    let mut links = vec![link(&item.url, "alternate")];
    if let Some(att) = &item.attachment {
        links.push(
            LinkBuilder::default()
                .href(att.url.clone())
                .rel("enclosure".to_string())
                .mime_type(Some(att.mime_type.clone()))
                .length(att.size.map(|size| size.to_string()))
                .title(att.title.clone())
                .build(),
        );
    }
    let authors = item
        .author
        .filter(|author| !author.name.is_empty())
        .map(|author| {
            PersonBuilder::default()
                .name(author.name.clone())
                .uri(Some(author.url.clone()))
                .build()
        })
        .into_iter()
        .collect::<Vec<_>>();
    let content = ContentBuilder::default()
        .value(Some(item.html()))
        .content_type(Some("html".to_string()))
        .build();
    EntryBuilder::default()
        .title(view.metadata.title.clone())
        .id(item.url.clone())
        .updated(fixed(entry.edited.unwrap_or(entry.published)))
        .published(Some(fixed(entry.published)))
        .authors(authors)
        .links(links)
        .content(Some(content))
        .build()
}
