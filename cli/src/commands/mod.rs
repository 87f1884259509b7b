mod account;
mod diary;
mod helpers;
mod profile;
mod recipe;
mod sync;
mod weight;

pub(crate) use account::{cmd_account_login, cmd_account_logout, cmd_account_show};
pub(crate) use diary::{cmd_diary_add, cmd_diary_delete, cmd_diary_show};
pub(crate) use profile::{cmd_profile_set, cmd_profile_show};
pub(crate) use recipe::{cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list, cmd_recipe_show};
pub(crate) use sync::{
    cmd_sync_history, cmd_sync_now, cmd_sync_pull, cmd_sync_push, cmd_sync_status,
};
pub(crate) use weight::{cmd_weight_delete, cmd_weight_history, cmd_weight_log};
