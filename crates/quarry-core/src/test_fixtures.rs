//! Entity types shared by the unit tests of this crate.

use serde::{Deserialize, Serialize};

use crate::filter::FilterOp;
use crate::model::{record_of, Entity, Field, Model, Schema};
use crate::relation::Relation;
use crate::value::{Value, ValueType};

pub const GENRES: &[&str] = &["rock", "jazz", "folk"];

// =============================================================================
// Label (nested model)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub country: String,
}

impl Model for Label {
    const NAME: &'static str = "label";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("name", ValueType::Text))
            .field(Field::new("country", ValueType::Text))
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "name" => Some(self.name.as_str().into()),
            "country" => Some(self.country.as_str().into()),
            _ => None,
        }
    }
}

// =============================================================================
// Artist
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub tag: Option<String>,
    pub genre: String,
    pub plays: i64,
    pub label: Option<Label>,
    #[serde(skip)]
    pub albums: Vec<Album>,
}

impl Model for Artist {
    const NAME: &'static str = "artist";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("id", ValueType::Int).key())
            .field(
                Field::new("name", ValueType::Text)
                    .searchable()
                    .sortable()
                    .required(),
            )
            .field(Field::new("tag", ValueType::Text).searchable())
            .field(Field::new("genre", ValueType::Enum(GENRES)))
            .field(
                Field::new("plays", ValueType::Int)
                    .searchable_with(&[
                        FilterOp::Equals,
                        FilterOp::GreaterThan,
                        FilterOp::GreaterOrEqual,
                    ])
                    .sortable(),
            )
            .field(Field::new("label", ValueType::Model(Label::schema)).sortable())
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "tag" => Some(self.tag.clone().into()),
            "genre" => Some(self.genre.as_str().into()),
            "plays" => Some(self.plays.into()),
            "label" => Some(record_of(self.label.as_ref())),
            _ => None,
        }
    }
}

impl Entity for Artist {
    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::collection::<Album>(
            "albums",
            |album, artist| album.artist_id == Some(artist.id),
            |artist, albums| artist.albums = albums,
        )]
    }
}

pub fn artist(id: i64, name: &str, tag: Option<&str>) -> Artist {
    Artist {
        id,
        name: name.to_string(),
        tag: tag.map(str::to_string),
        genre: "rock".to_string(),
        plays: 0,
        label: None,
        albums: Vec::new(),
    }
}

// =============================================================================
// Album
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub artist_id: Option<i64>,
    #[serde(skip)]
    pub artist: Option<Artist>,
}

impl Model for Album {
    const NAME: &'static str = "album";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("id", ValueType::Int).key())
            .field(Field::new("title", ValueType::Text).searchable().sortable())
            .field(Field::new("artist_id", ValueType::Int))
            .field(Field::new("artist", ValueType::Model(Artist::schema)).sortable())
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.as_str().into()),
            "artist_id" => Some(self.artist_id.into()),
            "artist" => Some(record_of(self.artist.as_ref())),
            _ => None,
        }
    }
}

impl Entity for Album {
    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::reference::<Artist>(
            "artist",
            |album| vec![album.artist_id.into()],
            |album, artist| album.artist = artist,
        )]
    }
}

pub fn album(id: i64, title: &str, artist_id: Option<i64>) -> Album {
    Album {
        id,
        title: title.to_string(),
        artist_id,
        artist: None,
    }
}

// =============================================================================
// Setlist (composite key, nothing searchable)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setlist {
    pub tour: String,
    pub position: i64,
    pub song: String,
}

impl Setlist {
    pub fn new(tour: &str, position: i64, song: &str) -> Self {
        Setlist {
            tour: tour.to_string(),
            position,
            song: song.to_string(),
        }
    }
}

impl Model for Setlist {
    const NAME: &'static str = "setlist";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("tour", ValueType::Text).key())
            .field(Field::new("position", ValueType::Int).key())
            .field(Field::new("song", ValueType::Text))
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "tour" => Some(self.tour.as_str().into()),
            "position" => Some(self.position.into()),
            "song" => Some(self.song.as_str().into()),
            _ => None,
        }
    }
}

impl Entity for Setlist {}

// =============================================================================
// Note (no key)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub body: String,
}

impl Model for Note {
    const NAME: &'static str = "note";

    fn schema() -> Schema {
        Schema::new(Self::NAME).field(Field::new("body", ValueType::Text))
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "body" => Some(self.body.as_str().into()),
            _ => None,
        }
    }
}

impl Entity for Note {}
