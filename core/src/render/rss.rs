use ::rss::{
    Channel, ChannelBuilder, EnclosureBuilder, GuidBuilder, ImageBuilder, Item, ItemBuilder,
};

use super::{FeedView, RenderError, RenderedItem};

pub(super) fn write(view: &FeedView<'_>) -> Result<Vec<u8>, RenderError> {
    let channel = channel(view);
    Ok(channel.write_to(Vec::new())?)
}

fn channel(view: &FeedView<'_>) -> Channel {
    let meta = view.metadata;
    let image = (!meta.icon.is_empty()).then(|| {
        ImageBuilder::default()
            .url(meta.icon.clone())
            .link(meta.icon.clone())
            .title(meta.title.clone())
            .build()
    });
    ChannelBuilder::default()
        .title(meta.title.clone())
        .link(view.homepage().to_string())
        .description(meta.description.clone())
        .language(meta.language.clone())
        .image(image)
        .last_build_date(view.updated().map(|t| t.to_rfc2822()))
        .items(
            view.items
                .iter()
                .map(|item| rss_item(view, item))
                .collect::<Vec<_>>(),
        )
        .build()
}

fn rss_item(view: &FeedView<'_>, item: &RenderedItem<'_>) -> Item {
    let html = item.html();
    let enclosure = item.attachment.as_ref().map(|att| {
        EnclosureBuilder::default()
            .url(att.url.clone())
            .length(att.size.unwrap_or_default().to_string())
            .mime_type(att.mime_type.clone())
            .build()
    });
    let guid = GuidBuilder::default()
        .value(item.url.clone())
        .permalink(true)
        .build();
    ItemBuilder::default()
        .title(Some(view.metadata.title.clone()))
        .link(Some(item.url.clone()))
        .description(Some(html))
        .author(
            item.author
                .map(|author| author.name.clone())
                .filter(|name| !name.is_empty()),
        )
        .guid(Some(guid))
        .pub_date(Some(item.entry.published.to_rfc2822()))
        .enclosure(enclosure)
        .build()
}
