// SPDX-License-Identifier: MPL-2.0

mod types;

pub use types::{
    AuthUser, Comment, Follow, Like, NewComment, NewPost, NewPostView, NewProfile, Post,
    PostAnalytics, PostKind, PostView, Profile, ProfileUpdate, Session,
};
